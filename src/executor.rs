//! Background/main-line execution boundary.
//!
//! Work submitted to a [`MainLine`] runs on the tokio blocking pool. Its
//! completion is queued and only runs when the owner of the main line drives
//! it through `run_next`, with exclusive access to the owner's state. Every
//! submission delivers exactly one completion; a panicking background
//! computation delivers `None`.

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::warn;

type Completion<S, R> = Box<dyn FnOnce(&mut S) -> R + Send>;

pub struct MainLine<S, R = ()> {
    handle: Handle,
    tx: mpsc::UnboundedSender<Completion<S, R>>,
    rx: mpsc::UnboundedReceiver<Completion<S, R>>,
    in_flight: usize,
}

impl<S: 'static, R: 'static> MainLine<S, R> {
    /// Binds to the runtime of the calling task.
    ///
    /// # Panics
    /// Outside of a tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(handle: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { handle, tx, rx, in_flight: 0 }
    }

    /// Runs `background` off the main line, then queues `completion` with its result.
    pub fn submit<T, B, C>(&mut self, background: B, completion: C)
    where
        T: Send + 'static,
        B: FnOnce() -> Option<T> + Send + 'static,
        C: FnOnce(&mut S, Option<T>) -> R + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.tx.clone();
        let task = self.handle.spawn_blocking(background);

        self.handle.spawn(async move {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "background computation did not finish");
                    None
                }
            };
            let job: Completion<S, R> = Box::new(move |state| completion(state, result));
            // The receiver lives as long as the main line; a closed channel means it was dropped
            let _ = tx.send(job);
        });
    }

    /// Waits for the next completion and runs it. `None` when nothing is in flight.
    pub async fn run_next(&mut self, state: &mut S) -> Option<R> {
        if self.in_flight == 0 {
            return None;
        }
        let job = self.rx.recv().await?;
        self.in_flight -= 1;
        Some(job(state))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[tokio::test]
    async fn completions_run_on_the_driving_task_in_completion_order() {
        let mut main_line: MainLine<Vec<&'static str>> = MainLine::new();
        let mut log = Vec::new();

        let (release_slow, gate) = std_mpsc::channel::<()>();
        main_line.submit(
            move || {
                gate.recv().ok()?;
                Some("slow")
            },
            |log: &mut Vec<&'static str>, r| log.extend(r),
        );
        main_line.submit(|| Some("fast"), |log: &mut Vec<&'static str>, r| log.extend(r));
        assert_eq!(main_line.in_flight(), 2);

        main_line.run_next(&mut log).await;
        assert_eq!(log, vec!["fast"]);

        release_slow.send(()).unwrap();
        main_line.run_next(&mut log).await;
        assert_eq!(log, vec!["fast", "slow"]);
        assert_eq!(main_line.in_flight(), 0);
        assert!(main_line.run_next(&mut log).await.is_none());
    }

    #[tokio::test]
    async fn panicking_background_delivers_none_once() {
        let mut main_line: MainLine<Vec<Option<u8>>> = MainLine::new();
        let mut seen = Vec::new();

        main_line.submit(|| -> Option<u8> { panic!("decoder blew up") }, |seen: &mut Vec<Option<u8>>, r| seen.push(r));
        main_line.run_next(&mut seen).await;

        assert_eq!(seen, vec![None]);
        assert_eq!(main_line.in_flight(), 0);
    }

    #[tokio::test]
    async fn completion_results_are_returned_to_the_driver() {
        let mut main_line: MainLine<u32, u32> = MainLine::new();
        let mut total = 0;

        main_line.submit(|| Some(5u32), |total: &mut u32, r| {
            *total += r.unwrap_or(0);
            *total
        });

        assert_eq!(main_line.run_next(&mut total).await, Some(5));
        assert_eq!(main_line.run_next(&mut total).await, None);
    }
}
