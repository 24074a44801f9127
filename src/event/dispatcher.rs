// src/event/dispatcher.rs
//! グローバルなディスパッチャー！ イベント名 → { リスナー → そのリスナーのコールバック表 }。
//!
//! 表に載せたり外したりするのはコールバック表 (bind / unbind / freeze) の仕事で、
//! ここは「登録順に全員の run を呼ぶ」だけを担当するよ。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::Value;

use super::{ListenerKey, Listener};

/// 表の1行。freeze 中のリスナーは行を消さずに `active = false` にしておく。
struct Entry {
    key: ListenerKey,
    listener: Weak<dyn Listener>,
    active: bool,
}

#[derive(Default)]
pub struct Dispatcher {
    /// リスナーは登録順の Vec で持つ。持ち主は弱参照なので、捨てられてたら飛ばす。
    handlers: RefCell<HashMap<String, Vec<Entry>>>,
}

impl Dispatcher {
    /// 載ってなければ末尾に、載ってれば (止まってても) 同じ位置のまま差し替えて動かす。
    pub(crate) fn attach(&self, event: &str, key: ListenerKey, listener: Weak<dyn Listener>) {
        let mut handlers = self.handlers.borrow_mut();
        let entries = handlers.entry(event.to_string()).or_default();
        match entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => {
                entry.listener = listener;
                entry.active = true;
            }
            None => entries.push(Entry {
                key,
                listener,
                active: true,
            }),
        }
    }

    /// 行は残したまま配送だけ止める (freeze 用)。unfreeze の `attach` で同じ位置に戻る。
    pub(crate) fn suspend(&self, event: &str, key: &ListenerKey) {
        if let Some(entries) = self.handlers.borrow_mut().get_mut(event) {
            for entry in entries.iter_mut().filter(|entry| entry.key == *key) {
                entry.active = false;
            }
        }
    }

    pub(crate) fn detach(&self, event: &str, key: &ListenerKey) {
        let mut handlers = self.handlers.borrow_mut();
        if let Some(entries) = handlers.get_mut(event) {
            entries.retain(|entry| entry.key != *key);
            if entries.is_empty() {
                handlers.remove(event);
            }
        }
    }

    /// 今 `event` を受け取るリスナー (登録順)。止まってるのは入らない。
    pub fn listeners(&self, event: &str) -> Vec<ListenerKey> {
        self.handlers
            .borrow()
            .get(event)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.active)
                    .map(|entry| entry.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.handlers
            .borrow()
            .get(event)
            .map_or(0, |entries| entries.iter().filter(|entry| entry.active).count())
    }

    pub fn is_listening(&self, event: &str, key: &ListenerKey) -> bool {
        self.handlers
            .borrow()
            .get(event)
            .is_some_and(|entries| entries.iter().any(|entry| entry.active && entry.key == *key))
    }

    /// `event` を載ってる全リスナーに配る。
    ///
    /// 順番は配り始めた時点の登録順。途中で足されたリスナーは今回は呼ばれないし、
    /// 途中で外されたり止まったりしたリスナーはまだ回ってきてなければ飛ばされる。
    /// freeze して unfreeze したリスナーは元の位置のまま。
    pub fn emit(&self, event: &str, data: &Value) {
        for key in self.listeners(event) {
            let Some(listener) = self.lookup(event, &key) else {
                continue;
            };
            let target = Rc::clone(&listener).target();
            listener.callbacks().run(&target, event, data);
        }
    }

    fn lookup(&self, event: &str, key: &ListenerKey) -> Option<Rc<dyn Listener>> {
        self.handlers
            .borrow()
            .get(event)?
            .iter()
            .find(|entry| entry.active && entry.key == *key)
            .and_then(|entry| entry.listener.upgrade())
    }
}
