//! Кольцевая очередь готовых потоков / Circular run queue
//!
//! `next` хвоста указывает на голову; `last` головы — `None`.
//! The tail's `next` wraps to the head; the head's `last` is `None`.
//!
//! Связи хранятся в таблице по `ThreadId`, а не в самих потоках.
//! Links live in a table keyed by `ThreadId`, not inside the threads.
//!
//! Методы не берут блокировку: её держит `Scheduler`.
//! Methods take no lock: the `Scheduler` holds it.

use alloc::collections::BTreeMap;
#[cfg(test)]
use alloc::vec::Vec;

use super::thread::ThreadId;

#[derive(Debug, Clone, Copy)]
struct Link {
    next: ThreadId,
    last: Option<ThreadId>,
}

#[derive(Debug, Default)]
pub struct RunQueue {
    first: Option<ThreadId>,
    last:  Option<ThreadId>,
    links: BTreeMap<ThreadId, Link>,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self { first: None, last: None, links: BTreeMap::new() }
    }

    pub fn len(&self) -> usize { self.links.len() }
    pub fn is_empty(&self) -> bool { self.first.is_none() }
    pub fn contains(&self, tid: ThreadId) -> bool { self.links.contains_key(&tid) }

    /// Добавить в хвост / Append at the tail
    pub fn enqueue(&mut self, tid: ThreadId) {
        assert!(!self.contains(tid), "[sched] thread {:?} enqueued twice", tid);

        let first = *self.first.get_or_insert(tid);
        let last = self.last;
        if let Some(tail) = last {
            self.link_mut(tail).next = tid;
        }
        self.links.insert(tid, Link { next: first, last });
        self.last = Some(tid);
    }

    /// Убрать произвольный поток; `false`, если его не было в очереди.
    /// Remove an arbitrary member; `false` when it was not queued.
    pub fn dequeue(&mut self, tid: ThreadId) -> bool {
        let link = match self.links.remove(&tid) {
            Some(link) => link,
            None => return false,
        };

        let is_head = self.first == Some(tid);
        let is_tail = self.last == Some(tid);

        if is_head && is_tail {
            self.first = None;
            self.last = None;
        } else if is_head {
            self.first = Some(link.next);
            self.link_mut(link.next).last = None;
            if let Some(tail) = self.last {
                self.link_mut(tail).next = link.next;
            }
        } else if let Some(prev) = link.last {
            self.link_mut(prev).next = link.next;
            if is_tail {
                self.last = Some(prev);
            } else {
                self.link_mut(link.next).last = Some(prev);
            }
        }
        true
    }

    /// Снять голову (дольше всех ждавший поток) / Pop the head (longest waiter)
    pub fn select_next(&mut self) -> Option<ThreadId> {
        let head = self.first?;
        self.dequeue(head);
        Some(head)
    }

    /// Потоки от головы к хвосту / Threads from head to tail
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        let mut cursor = self.first;
        (0..self.len()).filter_map(move |_| {
            let tid = cursor?;
            cursor = Some(self.links[&tid].next);
            Some(tid)
        })
    }

    fn link_mut(&mut self, tid: ThreadId) -> &mut Link {
        match self.links.get_mut(&tid) {
            Some(link) => link,
            None => panic!("[sched] run queue lost link for {:?}", tid),
        }
    }

    /// Проверка цикла для тестов / Cycle check used by tests
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let (Some(first), Some(last)) = (self.first, self.last) else {
            return self.links.is_empty() && self.first.is_none() && self.last.is_none();
        };
        let order: Vec<ThreadId> = self.iter().collect();
        self.links[&last].next == first
            && self.links[&first].last.is_none()
            && order.len() == self.links.len()
            && order.windows(2).all(|pair| self.links[&pair[1]].last == Some(pair[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u64) -> ThreadId { ThreadId(n) }

    fn queue(ids: &[u64]) -> RunQueue {
        let mut q = RunQueue::new();
        for &id in ids {
            q.enqueue(t(id));
        }
        q
    }

    fn order(q: &RunQueue) -> Vec<u64> {
        q.iter().map(|tid| tid.0).collect()
    }

    #[test]
    fn single_member_points_to_itself() {
        let q = queue(&[1]);
        assert_eq!(q.links[&t(1)].next, t(1));
        assert!(q.is_consistent());
    }

    #[test]
    fn fifo_order() {
        let mut q = queue(&[1, 2, 3]);
        assert_eq!(q.select_next(), Some(t(1)));
        assert_eq!(q.select_next(), Some(t(2)));
        q.enqueue(t(1));
        assert_eq!(order(&q), vec![3, 1]);
        assert!(q.is_consistent());
        assert_eq!(q.select_next(), Some(t(3)));
        assert_eq!(q.select_next(), Some(t(1)));
        assert_eq!(q.select_next(), None);
        assert!(q.is_consistent());
    }

    #[test]
    fn dequeue_any_position() {
        for victim in 1..=4 {
            let mut q = queue(&[1, 2, 3, 4]);
            assert!(q.dequeue(t(victim)));
            let expected: Vec<u64> = (1..=4).filter(|&id| id != victim).collect();
            assert_eq!(order(&q), expected);
            assert!(q.is_consistent(), "broken after removing {}", victim);
        }
    }

    #[test]
    fn dequeue_sole_member_empties() {
        let mut q = queue(&[7]);
        assert!(q.dequeue(t(7)));
        assert!(q.is_empty());
        assert!(q.is_consistent());
        assert!(!q.dequeue(t(7)));
    }

    #[test]
    fn tail_then_head_removal_keeps_cycle() {
        let mut q = queue(&[1, 2, 3]);
        q.dequeue(t(3));
        q.dequeue(t(1));
        assert_eq!(order(&q), vec![2]);
        assert!(q.is_consistent());
        q.enqueue(t(4));
        assert_eq!(order(&q), vec![2, 4]);
        assert!(q.is_consistent());
    }

    #[test]
    #[should_panic(expected = "enqueued twice")]
    fn double_enqueue_is_fatal() {
        let mut q = queue(&[1]);
        q.enqueue(t(1));
    }
}
