//! A FIFO queue over a single vector, used to flatten attribute trees without recursion.

/// Minimum number of slots a [`Queue`] (and a [`LineBuffer`][crate::LineBuffer]) is sized for.
pub(crate) const MIN_CAPACITY: usize = 4;

/// A first-in, first-out queue backed by one growable vector and a read cursor.
///
/// Popped slots are left empty until the read cursor reaches half of the vector's capacity, at
/// which point the unread elements are moved to the front of the vector. Pushes and pops are
/// amortized O(1), and the used prefix of the vector never grows past what the unread elements
/// need plus the compaction threshold.
#[derive(Debug, Clone)]
pub struct Queue<T> {
    items: Vec<Option<T>>,
    head: usize,
}

impl<T> Queue<T> {
    /// Creates a new queue with room for at least `capacity` elements.
    ///
    /// The capacity is clamped to a small minimum, since callers typically size the queue by an
    /// estimated attribute count which may well be zero.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.max(MIN_CAPACITY)),
            head: 0,
        }
    }

    /// Returns the number of elements waiting in the queue.
    pub fn len(&self) -> usize {
        self.items.len() - self.head
    }

    /// Returns `true` if there are no elements waiting in the queue.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds an element to the back of the queue.
    pub fn push_back(&mut self, item: T) {
        self.items.push(Some(item));
    }

    /// Removes the element at the front of the queue and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty. Callers must check [`Queue::len`] first: draining a queue
    /// past its end is a bug in the caller, not a recoverable condition.
    #[allow(clippy::panic, reason = "popping from an empty queue is a contract violation")]
    pub fn pop_front(&mut self) -> T {
        let Some(item) = self.items.get_mut(self.head).and_then(Option::take) else {
            panic!("pop from empty queue");
        };
        self.head += 1;

        if self.head >= self.items.capacity() / 2 {
            self.compact();
        }

        item
    }

    /// Moves the unread elements to the start of the vector and resets the read cursor.
    fn compact(&mut self) {
        self.items.drain(..self.head);
        self.head = 0;
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn push_pop_keeps_fifo_order() {
        let mut queue = Queue::with_capacity(6);
        queue.push_back(1);
        queue.push_back(2);
        queue.push_back(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front(), 1);
        assert_eq!(queue.pop_front(), 2);
        assert_eq!(queue.pop_front(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn compacts_once_cursor_passes_half_capacity() {
        let mut queue = Queue::with_capacity(8);
        for i in 0..6 {
            queue.push_back(i);
        }
        let capacity = queue.items.capacity();

        for expected in 0..(capacity / 2 - 1) {
            assert_eq!(queue.pop_front(), expected);
        }
        assert_eq!(queue.head, capacity / 2 - 1);

        // this pop crosses the threshold and moves the rest to the front
        assert_eq!(queue.pop_front(), capacity / 2 - 1);
        assert_eq!(queue.head, 0);
        assert_eq!(queue.len(), 6 - capacity / 2);
        assert_eq!(queue.items[0], Some(capacity / 2));
    }

    #[test]
    fn compacting_the_last_element_resets_cursors() {
        let mut queue = Queue::with_capacity(4);
        queue.push_back(1);
        queue.push_back(2);
        assert_eq!(queue.pop_front(), 1);
        assert_eq!(queue.pop_front(), 2);
        assert_eq!(queue.head, 0);
        assert!(queue.items.is_empty());
    }

    #[test]
    fn push_to_rotated() {
        let mut queue = Queue::with_capacity(2);
        queue.push_back(1);
        queue.push_back(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front(), 1);
        queue.push_back(3);
        assert_eq!(queue.pop_front(), 2);
        assert_eq!(queue.pop_front(), 3);
        queue.push_back(4);
        assert_eq!(queue.pop_front(), 4);
    }

    #[test]
    #[should_panic(expected = "pop from empty queue")]
    fn pop_from_empty_queue() {
        let mut queue = Queue::<u8>::with_capacity(6);
        queue.pop_front();
    }

    #[test]
    #[should_panic(expected = "pop from empty queue")]
    fn pop_past_the_end_after_rotation() {
        let mut queue = Queue::with_capacity(16);
        queue.push_back(1);
        queue.push_back(2);
        queue.pop_front();
        queue.pop_front();
        queue.pop_front();
    }

    #[test]
    fn min_capacity_is_always_preset() {
        let queue = Queue::<u8>::with_capacity(0);
        assert!(queue.items.capacity() >= MIN_CAPACITY);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u32),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u32>().prop_map(Op::Push), Just(Op::Pop)]
    }

    proptest! {
        #[test]
        fn matches_reference_deque(
            capacity in 0usize..16,
            seed in prop::collection::vec(any::<u32>(), 0..32),
            seed_pops in 0usize..32,
            ops in prop::collection::vec(op(), 0..256),
        ) {
            let mut queue = Queue::with_capacity(capacity);
            let mut reference = VecDeque::new();

            for value in seed {
                queue.push_back(value);
                reference.push_back(value);
            }
            for _ in 0..seed_pops.min(reference.len()) {
                prop_assert_eq!(Some(queue.pop_front()), reference.pop_front());
            }

            for op in ops {
                match op {
                    Op::Push(value) => {
                        queue.push_back(value);
                        reference.push_back(value);
                    }
                    Op::Pop if reference.is_empty() => prop_assert!(queue.is_empty()),
                    Op::Pop => prop_assert_eq!(Some(queue.pop_front()), reference.pop_front()),
                }
                prop_assert_eq!(queue.len(), reference.len());
            }

            while let Some(expected) = reference.pop_front() {
                prop_assert_eq!(queue.pop_front(), expected);
            }
            prop_assert!(queue.is_empty());
        }
    }
}
