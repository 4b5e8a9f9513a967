//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! Fair polling order over connected clients.
//!
//! Items form a doubly linked ring keyed by the item itself, so add and
//! remove are O(1) and a removal while a round snapshot is being walked never
//! disturbs the remaining order. The cursor names the item polled next.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy)]
struct Link<T> {
    prev: T,
    next: T,
}

#[derive(Debug, Clone)]
pub struct RoundRobinScheduler<T> {
    links: HashMap<T, Link<T>>,
    cursor: Option<T>,
}

impl<T> Default for RoundRobinScheduler<T> {
    fn default() -> Self {
        Self {
            links: HashMap::new(),
            cursor: None,
        }
    }
}

impl<T: Copy + Eq + Hash> RoundRobinScheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.links.contains_key(item)
    }

    /// Insert `item` at the end of the round that starts at the cursor, so it
    /// is polled after every item already scheduled.
    pub fn add(&mut self, item: T) -> Result<(), SchedulerError> {
        if self.links.contains_key(&item) {
            return Err(SchedulerError::AlreadyScheduled);
        }
        let Some(head) = self.cursor else {
            self.links.insert(item, Link { prev: item, next: item });
            self.cursor = Some(item);
            return Ok(());
        };
        let tail = self.links.get(&head).map_or(head, |link| link.prev);
        if let Some(link) = self.links.get_mut(&tail) {
            link.next = item;
        }
        if let Some(link) = self.links.get_mut(&head) {
            link.prev = item;
        }
        self.links.insert(item, Link { prev: tail, next: head });
        Ok(())
    }

    pub fn remove(&mut self, item: &T) -> Result<(), SchedulerError> {
        let link = self
            .links
            .remove(item)
            .ok_or(SchedulerError::NotScheduled)?;
        if self.links.is_empty() {
            self.cursor = None;
            return Ok(());
        }
        if let Some(prev) = self.links.get_mut(&link.prev) {
            prev.next = link.next;
        }
        if let Some(next) = self.links.get_mut(&link.next) {
            next.prev = link.prev;
        }
        if self.cursor.as_ref() == Some(item) {
            self.cursor = Some(link.next);
        }
        Ok(())
    }

    /// Return the item at the cursor and advance past it.
    pub fn next(&mut self) -> Result<T, SchedulerError> {
        let item = self.cursor.ok_or(SchedulerError::Empty)?;
        self.cursor = self.links.get(&item).map(|link| link.next);
        Ok(item)
    }

    /// Every item once, starting at the cursor. Does not move the cursor.
    pub fn round(&self) -> Vec<T> {
        let mut order = Vec::with_capacity(self.links.len());
        let Some(start) = self.cursor else {
            return order;
        };
        let mut item = start;
        loop {
            order.push(item);
            item = match self.links.get(&item) {
                Some(link) => link.next,
                None => break,
            };
            if item == start || order.len() == self.links.len() {
                break;
            }
        }
        order
    }

    /// Record that `item` was polled: the next round starts right after it.
    pub fn mark_polled(&mut self, item: &T) {
        if let Some(link) = self.links.get(item) {
            self.cursor = Some(link.next);
        }
    }

    /// Move the cursor one place forward.
    pub fn rotate(&mut self) {
        let _ = self.next();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn scheduler(items: &[u32]) -> RoundRobinScheduler<u32> {
        let mut scheduler = RoundRobinScheduler::new();
        for item in items {
            scheduler.add(*item).unwrap();
        }
        scheduler
    }

    #[test]
    fn empty_scheduler() {
        let mut scheduler = RoundRobinScheduler::<u32>::new();
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next(), Err(SchedulerError::Empty));
        assert!(scheduler.round().is_empty());
    }

    #[test]
    fn add_existing_item_fails() {
        let mut scheduler = scheduler(&[0]);
        assert_eq!(scheduler.add(0), Err(SchedulerError::AlreadyScheduled));
    }

    #[test]
    fn remove_unknown_item_fails() {
        let mut scheduler = scheduler(&[0]);
        assert_eq!(scheduler.remove(&1), Err(SchedulerError::NotScheduled));
    }

    #[test]
    fn single_item_repeats() {
        let mut scheduler = scheduler(&[7]);
        assert_eq!(scheduler.next(), Ok(7));
        assert_eq!(scheduler.next(), Ok(7));
        scheduler.remove(&7).unwrap();
        assert_eq!(scheduler.next(), Err(SchedulerError::Empty));
    }

    #[test]
    fn cycles_in_insertion_order() {
        let mut scheduler = scheduler(&[0, 1, 2]);
        let order: Vec<_> = (0..7).map(|_| scheduler.next().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn remove_at_cursor_skips_to_successor() {
        let mut scheduler = scheduler(&[0, 1, 2]);
        for expected in [0, 1, 2, 0] {
            assert_eq!(scheduler.next(), Ok(expected));
        }
        scheduler.remove(&1).unwrap();
        assert_eq!(scheduler.next(), Ok(2));
        assert_eq!(scheduler.next(), Ok(0));
        assert_eq!(scheduler.next(), Ok(2));
    }

    #[test]
    fn add_during_round_lands_just_before_the_cursor() {
        let mut scheduler = scheduler(&[0, 1]);
        assert_eq!(scheduler.next(), Ok(0));
        scheduler.add(2).unwrap();
        assert_eq!(scheduler.round(), vec![1, 0, 2]);
        let order: Vec<_> = (0..4).map(|_| scheduler.next().unwrap()).collect();
        assert_eq!(order, vec![1, 0, 2, 1]);
    }

    #[test]
    fn round_starts_after_last_polled() {
        let mut scheduler = scheduler(&[0, 1, 2, 3]);
        assert_eq!(scheduler.round(), vec![0, 1, 2, 3]);
        scheduler.mark_polled(&1);
        assert_eq!(scheduler.round(), vec![2, 3, 0, 1]);
        scheduler.rotate();
        assert_eq!(scheduler.round(), vec![3, 0, 1, 2]);
    }

    #[test]
    fn rounds_visit_every_item_once_under_random_churn() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut scheduler = RoundRobinScheduler::new();
        let mut live = HashSet::new();
        for _ in 0..500 {
            let item: u32 = rng.gen_range(0..32);
            if rng.gen_bool(0.6) {
                let added = scheduler.add(item).is_ok();
                assert_eq!(added, live.insert(item));
            } else {
                let removed = scheduler.remove(&item).is_ok();
                assert_eq!(removed, live.remove(&item));
            }
            if rng.gen_bool(0.3) && !scheduler.is_empty() {
                let polled = scheduler.next().unwrap();
                assert!(live.contains(&polled));
            }

            let round = scheduler.round();
            assert_eq!(round.len(), live.len());
            assert_eq!(round.iter().copied().collect::<HashSet<_>>(), live);
        }
    }

    #[test]
    fn one_poll_per_tick_reaches_everyone_within_n_ticks() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let count = rng.gen_range(1..12u32);
            let mut items: Vec<u32> = (0..count).collect();
            // registration order must not matter
            for i in (1..items.len()).rev() {
                items.swap(i, rng.gen_range(0..=i));
            }
            let mut scheduler = scheduler(&items);
            for _ in 0..rng.gen_range(0..count) {
                scheduler.rotate();
            }
            let mut seen = HashSet::new();
            for _ in 0..count {
                let first = scheduler.round()[0];
                scheduler.mark_polled(&first);
                seen.insert(first);
            }
            assert_eq!(seen.len(), count as usize);
        }
    }
}
