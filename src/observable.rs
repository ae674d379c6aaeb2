use tokio::sync::watch;

/// Single-slot, last-write-wins state holder with explicit subscription.
///
/// Readers either sample the current value with [`Observable::get`] or keep a
/// [`watch::Receiver`] from [`Observable::subscribe`] and await changes.
#[derive(Debug)]
pub struct Observable<T> {
    sender: watch::Sender<T>,
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Replace the value and wake subscribers; returns the previous value
    pub fn set(&self, value: T) -> T {
        self.sender.send_replace(value)
    }

    /// Mutate in place; subscribers are woken only when `f` returns true
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.sender.send_if_modified(f)
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
