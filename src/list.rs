use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Intrusive list node. The node itself is written into memory the list does
/// not own, e.g. the first bytes of a pool reservation.
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Doubly linked list used for the pools of an allocator. Nodes are kept in
/// insertion order, so `first` is the oldest and `last` the newest.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

pub(crate) struct Iter<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a T>,
}

/// Like [`Iter`] but yields the node pointers, for callers that need to
/// mutate or unlink what they find.
pub(crate) struct Nodes<'a, T> {
    current: Link<Node<T>>,
    marker: PhantomData<&'a T>,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn first(&self) -> Link<Node<T>> {
        self.head
    }

    #[inline]
    pub fn last(&self) -> Link<Node<T>> {
        self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a new node to the Linked List.
    ///
    /// It is very important for us that, because we are the actual memory
    /// allocator, this method can not make allocations itself. Therefor,
    /// it has to receive the `addr` where this node has to be written.
    ///
    /// **SAFETY**: `addr` must be valid for writes of `Node<T>`, suitably
    /// aligned, and stay valid until the node is removed.
    pub unsafe fn append(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: None,
                prev: self.tail,
                data,
            });

            if let Some(mut tail) = self.tail {
                tail.as_mut().next = Some(node);
            } else {
                self.head = Some(node);
            }
        }

        self.tail = Some(node);
        self.len += 1;

        node
    }

    /// Unlinks `node`. Its memory is left untouched.
    ///
    /// **SAFETY**: `node` must currently belong to this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let (prev, next) = {
                let node = node.as_ref();
                (node.prev, node.next)
            };

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut next) => next.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }

        self.len -= 1;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }

    pub fn nodes(&self) -> Nodes<'_, T> {
        Nodes {
            current: self.head,
            marker: PhantomData,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
            self.remaining -= 1;

            Some(&node.as_ref().data)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> Iterator for Nodes<'_, T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        self.current = unsafe { node.as_ref().next };

        Some(node)
    }
}
