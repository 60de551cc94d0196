#[cfg(not(test))]
pub fn now_monotonic() -> std::time::Instant {
    std::time::Instant::now()
}

#[cfg(test)]
pub use mock_time::now_monotonic;

/// Testing utilities for mocking (monotonic) timestamps.
/// Use the `now_monotonic` function if you want to be able to mock the time in tests.
#[cfg(test)]
pub mod mock_time {
    use std::cell::RefCell;
    use std::time::Instant;

    thread_local! {
        static MOCK_TIME: RefCell<Option<Instant>> = const { RefCell::new(None) };
    }

    /// Guard that overrides `now_monotonic` on the current thread until dropped.
    pub struct MockTime;

    impl MockTime {
        pub fn mock(time: Instant) -> Self {
            MOCK_TIME.with(|cell| {
                assert!(cell.borrow().is_none());
                *cell.borrow_mut() = Some(time);
            });
            MockTime
        }
    }

    impl Drop for MockTime {
        fn drop(&mut self) {
            MOCK_TIME.with(|cell| *cell.borrow_mut() = None);
        }
    }

    pub fn now_monotonic() -> Instant {
        MOCK_TIME.with(|cell| cell.borrow().unwrap_or_else(Instant::now))
    }
}
