//! The server's collection of active connections.
//!
//! A vector-backed binary min-heap ordered by an interface the protocol
//! collaborator implements. The heap reports every slot move back through
//! [`ConnOrder::record`], so a connection always knows its own position
//! and can be removed in O(log n) when it times out or closes. This layer
//! never interprets connection contents.

/// Ordering interface over connections, implemented by the protocol layer.
pub trait ConnOrder<C> {
    /// `true` when `a` is due strictly before `b`.
    fn less(&self, a: &C, b: &C) -> bool;

    /// Called whenever `conn` moves to heap slot `pos`.
    fn record(&self, conn: &mut C, pos: usize);
}

/// Min-heap of connections with position recording.
pub struct ConnHeap<C: 'static> {
    order: Box<dyn ConnOrder<C>>,
    items: Vec<C>,
}

impl<C: 'static> ConnHeap<C> {
    pub fn new(order: Box<dyn ConnOrder<C>>) -> Self {
        Self {
            order,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The connection with the earliest deadline, if any.
    pub fn peek(&self) -> Option<&C> {
        self.items.first()
    }

    pub fn push(&mut self, conn: C) {
        self.items.push(conn);
        let last = self.items.len() - 1;
        self.order.record(&mut self.items[last], last);
        self.sift_up(last);
    }

    pub fn pop(&mut self) -> Option<C> {
        self.remove(0)
    }

    /// Remove the connection at `pos` (the slot last given to `record`).
    pub fn remove(&mut self, pos: usize) -> Option<C> {
        if pos >= self.items.len() {
            return None;
        }
        let removed = self.items.swap_remove(pos);
        if pos < self.items.len() {
            self.order.record(&mut self.items[pos], pos);
            // The displaced element may violate the order in either direction.
            let pos = self.sift_down(pos);
            self.sift_up(pos);
        }
        Some(removed)
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.order.less(&self.items[pos], &self.items[parent]) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) -> usize {
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < self.items.len() && self.order.less(&self.items[left], &self.items[smallest])
            {
                smallest = left;
            }
            if right < self.items.len()
                && self.order.less(&self.items[right], &self.items[smallest])
            {
                smallest = right;
            }
            if smallest == pos {
                return pos;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.items.swap(a, b);
        self.order.record(&mut self.items[a], a);
        self.order.record(&mut self.items[b], b);
    }
}
