// src/event/callbacks.rs
//! リスナー1つぶんのコールバック表だよ！ (イベント名 → コールバックの並び)
//!
//! ここがイベントまわりで一番デリケートなところ。コールバックの中から
//! 自分を unbind したり、同じイベントをもう一回 trigger したりしても
//! ループが壊れないようにしてある。
//!
//! - unbind は並びから抜かずに「墓石」(`None`) を置くだけ。
//! - 並びごとに「今この並びを何重に回してるか」の深さカウンタを持つ。
//! - 墓石を実際に詰めるのは、深さが一番外側 (1 以下) に戻ってる時だけ。
//! - 並びが空になったらイベント名ごと消して、ディスパッチャーからも外す。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::Value;

use super::dispatcher::Dispatcher;
use super::{Handler, ListenerKey, Listener, Target};

/// 1つのイベントのコールバックの並び。
#[derive(Default)]
pub(crate) struct CallbackList {
    /// `None` は unbind 済みの墓石。
    slots: RefCell<Vec<Option<Handler>>>,
    /// 今この並びを回してる run の重なり数。
    depth: Cell<u32>,
}

impl CallbackList {
    fn live_len(&self) -> usize {
        self.slots.borrow().iter().filter(|slot| slot.is_some()).count()
    }

    /// 墓石をぜんぶ詰める。空になったら true。
    fn compact(&self) -> bool {
        let mut slots = self.slots.borrow_mut();
        slots.retain(Option::is_some);
        slots.is_empty()
    }
}

/// エンティティ・システム・World・EntitySet がそれぞれ1つずつ持つコールバック表。
pub struct CallbackRegistry {
    key: ListenerKey,
    lists: RefCell<HashMap<String, Rc<CallbackList>>>,
    frozen: Cell<bool>,
    dispatcher: Weak<Dispatcher>,
    owner: Weak<dyn Listener>,
}

impl CallbackRegistry {
    pub(crate) fn new(key: ListenerKey, dispatcher: Weak<Dispatcher>, owner: Weak<dyn Listener>) -> Self {
        CallbackRegistry {
            key,
            lists: RefCell::new(HashMap::new()),
            frozen: Cell::new(false),
            dispatcher,
            owner,
        }
    }

    pub fn key(&self) -> &ListenerKey {
        &self.key
    }

    /// コールバックを並びの末尾に足す。並びが無ければ作って、ディスパッチャーにも登録する。
    pub fn bind(&self, event: &str, handler: Handler) {
        let list = Rc::clone(
            self.lists
                .borrow_mut()
                .entry(event.to_string())
                .or_default(),
        );
        list.slots.borrow_mut().push(Some(handler));
        if !self.frozen.get() {
            self.attach(event);
        }
    }

    /// `handler` に一致するものだけ (`None` なら全部) 墓石にする。
    /// 誰もこの並びを回してなければ、その場で詰めちゃう。
    pub fn unbind(&self, event: &str, handler: Option<&Handler>) {
        let Some(list) = self.list(event) else {
            return;
        };
        for slot in list.slots.borrow_mut().iter_mut() {
            let matches = match (handler, slot.as_ref()) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(wanted), Some(bound)) => bound.ptr_eq(wanted),
            };
            if matches {
                *slot = None;
            }
        }
        if list.depth.get() == 0 && list.compact() {
            self.drop_list(event, &list);
        }
    }

    /// 全イベントのコールバックを外して、ディスパッチャーからも消える。destroy 用。
    pub fn unbind_all(&self) {
        self.frozen.set(false);
        for event in self.events_including_dead() {
            self.unbind(&event, None);
            self.detach(&event);
        }
    }

    /// ディスパッチャーでの配送を止める。コールバック自体も表での位置もそのまま。
    pub fn freeze(&self) {
        for event in self.events_including_dead() {
            if let Some(dispatcher) = self.dispatcher.upgrade() {
                dispatcher.suspend(&event, &self.key);
            }
        }
        self.frozen.set(true);
    }

    /// freeze で止めてた分を同じ位置のまま動かし直す。ハンドラの登録し直しはしない。
    pub fn unfreeze(&self) {
        self.frozen.set(false);
        for event in self.events_including_dead() {
            self.attach(&event);
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    /// 生きてるコールバックが1つでもあるイベントか。
    pub fn has_event(&self, event: &str) -> bool {
        self.list(event).is_some_and(|list| list.live_len() > 0)
    }

    /// 生きてるコールバックの数。
    pub fn count(&self, event: &str) -> usize {
        self.list(event).map_or(0, |list| list.live_len())
    }

    /// 生きてるコールバックを持ってるイベント名。
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self
            .lists
            .borrow()
            .iter()
            .filter(|(_, list)| list.live_len() > 0)
            .map(|(event, _)| event.clone())
            .collect();
        events.sort();
        events
    }

    /// `event` のコールバックを bind した順に全部呼ぶ。
    ///
    /// ループの長さは毎回読み直すので、途中で append されたものも同じ周回で呼ばれる。
    /// 墓石は深さが 1 以下の時だけ詰める (ネストした run の添字を壊さないため)。
    pub(crate) fn run(&self, target: &Target, event: &str, data: &Value) {
        if self.frozen.get() {
            return;
        }
        let Some(list) = self.list(event) else {
            return;
        };

        list.depth.set(list.depth.get() + 1);
        let mut i = 0;
        loop {
            let slot = match list.slots.borrow().get(i) {
                Some(slot) => slot.clone(),
                None => break,
            };
            match slot {
                Some(handler) => {
                    handler.call(target, data);
                    i += 1;
                }
                None if list.depth.get() <= 1 => {
                    let now_empty = {
                        let mut slots = list.slots.borrow_mut();
                        slots.remove(i);
                        slots.is_empty()
                    };
                    if now_empty {
                        self.drop_list(event, &list);
                    }
                }
                None => i += 1,
            }
        }
        // 通り過ぎたあとに置かれた墓石もここで詰める
        if list.depth.get() <= 1 && list.compact() {
            self.drop_list(event, &list);
        }
        list.depth.set(list.depth.get() - 1);
    }

    fn list(&self, event: &str) -> Option<Rc<CallbackList>> {
        self.lists.borrow().get(event).cloned()
    }

    fn events_including_dead(&self) -> Vec<String> {
        self.lists.borrow().keys().cloned().collect()
    }

    /// 空になった並びを消す。もう別の並びに差し替わってたら触らない。
    fn drop_list(&self, event: &str, list: &Rc<CallbackList>) {
        let removed = {
            let mut lists = self.lists.borrow_mut();
            match lists.get(event) {
                Some(current) if Rc::ptr_eq(current, list) => lists.remove(event).is_some(),
                _ => false,
            }
        };
        if removed {
            self.detach(event);
        }
    }

    fn attach(&self, event: &str) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.attach(event, self.key.clone(), self.owner.clone());
        }
    }

    fn detach(&self, event: &str) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.detach(event, &self.key);
        }
    }
}
