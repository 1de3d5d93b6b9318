//! Retained messages, stored in a topic trie.
//!
//! ```text
//!   Root
//!   ├── iot
//!   │   └── b
//!   │       ├── x (value=1)
//!   │       └── y (value=2)
//!   └── x
//!       └── y (value=3)
//! ```
//!
//! A subscription filter walks the trie level by level, so `+` fans out over one set of
//! branches and `#` collects the whole subtree, without touching unrelated topics.

use parking_lot::RwLock;

use tmqtt_utils::Counter;

use crate::topic::{Level, Topic};
use crate::types::{HashMap, Publish};
use crate::Result;

#[derive(Default)]
pub struct RetainStore {
    messages: RwLock<RetainTree<Publish>>,
    retaineds: Counter,
}

impl RetainStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `publish` as the retained message of its topic. An empty payload deletes it.
    pub fn set(&self, publish: &Publish) -> Result<()> {
        let topic = Topic::name(&publish.topic)?;
        let mut messages = self.messages.write();
        let old = messages.remove(&topic);
        if !publish.payload.is_empty() {
            messages.insert(&topic, publish.clone());
            if old.is_none() {
                self.retaineds.inc();
            }
        } else if old.is_some() {
            self.retaineds.dec();
        }
        Ok(())
    }

    /// All retained messages whose topic is matched by `topic_filter`.
    pub fn matches(&self, topic_filter: &str) -> Result<Vec<Publish>> {
        let filter = Topic::filter(topic_filter)?;
        Ok(self.messages.read().matches(&filter).into_iter().map(|(_, p)| p).collect())
    }

    #[inline]
    pub fn count(&self) -> isize {
        self.retaineds.count()
    }

    #[inline]
    pub fn max(&self) -> isize {
        self.retaineds.max()
    }
}

pub type RetainTree<V> = Node<V>;

pub struct Node<V> {
    value: Option<V>,
    branches: HashMap<Level, Node<V>>,
}

impl<V> Default for Node<V> {
    #[inline]
    fn default() -> Node<V> {
        Self { value: None, branches: HashMap::default() }
    }
}

impl<V: Clone> Node<V> {
    pub fn insert(&mut self, topic: &Topic, value: V) {
        let node = topic.levels().iter().fold(self, |node, level| node.branches.entry(level.clone()).or_default());
        node.value = Some(value);
    }

    #[inline]
    pub fn remove(&mut self, topic: &Topic) -> Option<V> {
        self.remove_path(topic.levels())
    }

    fn remove_path(&mut self, path: &[Level]) -> Option<V> {
        let Some((first, rest)) = path.split_first() else {
            return self.value.take();
        };
        let child = self.branches.get_mut(first)?;
        let removed = child.remove_path(rest);
        if child.is_empty() {
            self.branches.remove(first);
        }
        removed
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.branches.is_empty()
    }

    /// Values stored under every concrete topic matched by `filter`.
    pub fn matches(&self, filter: &Topic) -> Vec<(Topic, V)> {
        let mut out = Vec::new();
        self.collect(filter.levels(), &mut Vec::new(), &mut out);
        out
    }

    fn collect(&self, filter: &[Level], prefix: &mut Vec<Level>, out: &mut Vec<(Topic, V)>) {
        let Some((first, rest)) = filter.split_first() else {
            if let Some(v) = self.value.as_ref() {
                out.push((Topic::from(prefix.clone()), v.clone()));
            }
            return;
        };

        match first {
            Level::SingleWildcard => {
                for (level, child) in self.branches.iter() {
                    if prefix.is_empty() && level.is_metadata() {
                        continue;
                    }
                    child.visit(level, rest, prefix, out);
                }
            }
            Level::MultiWildcard => {
                //`a/#` also matches `a`
                if let Some(v) = self.value.as_ref().filter(|_| !prefix.is_empty()) {
                    out.push((Topic::from(prefix.clone()), v.clone()));
                }
                for (level, child) in self.branches.iter() {
                    if prefix.is_empty() && level.is_metadata() {
                        continue;
                    }
                    prefix.push(level.clone());
                    child.collect_all(prefix, out);
                    prefix.pop();
                }
            }
            level => {
                if let Some(child) = self.branches.get(level) {
                    child.visit(level, rest, prefix, out);
                }
            }
        }
    }

    #[inline]
    fn visit(&self, level: &Level, rest: &[Level], prefix: &mut Vec<Level>, out: &mut Vec<(Topic, V)>) {
        prefix.push(level.clone());
        self.collect(rest, prefix, out);
        prefix.pop();
    }

    fn collect_all(&self, prefix: &mut Vec<Level>, out: &mut Vec<(Topic, V)>) {
        if let Some(v) = self.value.as_ref() {
            out.push((Topic::from(prefix.clone()), v.clone()));
        }
        for (level, child) in self.branches.iter() {
            prefix.push(level.clone());
            child.collect_all(prefix, out);
            prefix.pop();
        }
    }

    #[inline]
    pub fn values_size(&self) -> usize {
        let len: usize = self.branches.values().map(|n| n.values_size()).sum();
        len + usize::from(self.value.is_some())
    }
}
