// src/event/mod.rs
//! イベントまわり！ リスナーごとのコールバック表 (callbacks) と、
//! イベント名から全リスナーへ配る表 (dispatcher) でできてるよ。

pub mod callbacks;
pub mod dispatcher;

pub use callbacks::CallbackRegistry;
pub use dispatcher::Dispatcher;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::ecs::{Entity, EntityId, EntitySet, System, World};

/// ディスパッチャーの表でリスナーを見分けるためのキー。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerKey {
    /// World そのもの (グローバルなリスナー)。
    World,
    Entity(EntityId),
    /// システムの ID (`"system1"` みたいな文字列)。
    System(String),
    /// EntitySet が自分で持ってるコールバック表。
    Set(u64),
}

/// ディスパッチャーが弱参照で持っておく「コールバック表の持ち主」。
pub(crate) trait Listener {
    fn callbacks(&self) -> &CallbackRegistry;
    /// コールバックに渡す `this` を作る。
    fn target(self: Rc<Self>) -> Target;
}

type HandlerFn = dyn Fn(&Target, &Value);

/// イベントハンドラだよ。中身は参照カウント付きのクロージャ。
///
/// 比較はポインタの同一性！ だから bind したのと同じ `Handler` (の clone) を
/// 渡せば、あとでちゃんと unbind できる。
#[derive(Clone)]
pub struct Handler(Rc<HandlerFn>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Target, &Value) + 'static,
    {
        Handler(Rc::new(f))
    }

    /// エンティティに bind される前提のハンドラ。受け手がエンティティじゃなければ呼ばない。
    pub fn for_entity<F>(f: F) -> Self
    where
        F: Fn(&Entity, &Value) + 'static,
    {
        Handler::new(move |target, data| {
            if let Target::Entity(entity) = target {
                f(entity, data);
            }
        })
    }

    /// システム用。
    pub fn for_system<F>(f: F) -> Self
    where
        F: Fn(&System, &Value) + 'static,
    {
        Handler::new(move |target, data| {
            if let Target::System(system) = target {
                f(system, data);
            }
        })
    }

    pub fn call(&self, target: &Target, data: &Value) {
        (self.0)(target, data)
    }

    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Rc::as_ptr(&self.0) as *const () == Rc::as_ptr(&other.0) as *const ()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// コールバックの受け手 (`this`)。
#[derive(Clone, Debug)]
pub enum Target {
    World(World),
    Entity(Entity),
    System(System),
    Set(EntitySet),
}

impl Target {
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Target::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn system(&self) -> Option<&System> {
        match self {
            Target::System(system) => Some(system),
            _ => None,
        }
    }

    /// 受け手が属してる World。World が先に捨てられてたら `None`。
    pub fn world(&self) -> Option<World> {
        match self {
            Target::World(world) => Some(world.clone()),
            Target::Entity(entity) => entity.world(),
            Target::System(system) => system.world(),
            Target::Set(set) => set.world(),
        }
    }
}

/// エンティティ・EntitySet・システム・World が共通で持ってるイベント API。
///
/// `on` / `emit` はそれぞれ `bind` / `trigger` の別名。見た目が違うだけで中身は同じ！
pub trait Events {
    /// コールバックを末尾に追加する。
    fn bind(&self, event: &str, handler: Handler) -> &Self;

    /// `handler` を渡せばそれだけ、`None` ならそのイベントの全コールバックを外す。
    fn unbind(&self, event: &str, handler: Option<&Handler>) -> &Self;

    fn trigger(&self, event: &str, data: &Value) -> &Self;

    fn on(&self, event: &str, handler: Handler) -> &Self {
        self.bind(event, handler)
    }

    fn emit(&self, event: &str, data: &Value) -> &Self {
        self.trigger(event, data)
    }

    /// 同じハンドラが既に付いてたら一回外してから付け直す。
    fn unique_bind(&self, event: &str, handler: Handler) -> &Self {
        self.unbind(event, Some(&handler));
        self.bind(event, handler)
    }

    /// 一回だけ呼ばれるハンドラ。発火したら受け手から自分を外すよ。
    /// 戻り値のラッパーを `unbind` に渡せば、発火前に取り消すこともできる。
    fn one(&self, event: &str, handler: Handler) -> Handler {
        let wrapper = once_wrapper(event, handler, |target, event, me| {
            target.unbind(event, Some(me));
        });
        self.bind(event, wrapper.clone());
        wrapper
    }
}

/// `one` 用のラッパーを作る。
///
/// 自分自身への参照は弱参照で持つ (強参照だと循環して二度と解放されない)。
/// `fired` フラグがあるから、ネストした trigger の途中でも二回目は呼ばれない。
pub(crate) fn once_wrapper<F>(event: &str, handler: Handler, detach: F) -> Handler
where
    F: Fn(&Target, &str, &Handler) + 'static,
{
    let event = event.to_string();
    let fired = Cell::new(false);
    let empty: Weak<HandlerFn> = Weak::<fn(&Target, &Value)>::new();
    let me = Rc::new(RefCell::new(empty));
    let slot = Rc::clone(&me);
    let wrapper: Rc<HandlerFn> = Rc::new(move |target: &Target, data: &Value| {
        if fired.replace(true) {
            return;
        }
        handler.call(target, data);
        let this = slot.borrow().upgrade();
        if let Some(this) = this {
            detach(target, &event, &Handler(this));
        }
    });
    *me.borrow_mut() = Rc::downgrade(&wrapper);
    Handler(wrapper)
}

impl Events for Target {
    fn bind(&self, event: &str, handler: Handler) -> &Self {
        match self {
            Target::World(world) => {
                world.bind(event, handler);
            }
            Target::Entity(entity) => {
                entity.bind(event, handler);
            }
            Target::System(system) => {
                system.bind(event, handler);
            }
            Target::Set(set) => {
                set.bind(event, handler);
            }
        }
        self
    }

    fn unbind(&self, event: &str, handler: Option<&Handler>) -> &Self {
        match self {
            Target::World(world) => {
                world.unbind(event, handler);
            }
            Target::Entity(entity) => {
                entity.unbind(event, handler);
            }
            Target::System(system) => {
                system.unbind(event, handler);
            }
            Target::Set(set) => {
                set.unbind(event, handler);
            }
        }
        self
    }

    fn trigger(&self, event: &str, data: &Value) -> &Self {
        match self {
            Target::World(world) => {
                world.trigger(event, data);
            }
            Target::Entity(entity) => {
                entity.trigger(event, data);
            }
            Target::System(system) => {
                system.trigger(event, data);
            }
            Target::Set(set) => {
                set.trigger(event, data);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_equality_is_identity() {
        let a = Handler::new(|_, _| {});
        let b = Handler::new(|_, _| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
