//! Bounded single-producer single-consumer byte pipe.
//!
//! Connects a caller-facing stream with the thread that talks to the network.
//! The writer blocks while the buffer is full and the reader blocks while it
//! is empty; both wait on one condition variable. Closing either end, or
//! cancelling, wakes the other side.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use gdata_core::cancel::HandlerId;
use gdata_core::{Cancellable, Error};

/// Default buffer size of a pipe.
pub(crate) const DEFAULT_CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct State {
    buf: VecDeque<u8>,
    writer_closed: bool,
    reader_closed: bool,
    cancelled: bool,
    /// The failure reported by whichever end closed with an error.
    error: Option<Error>,
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        match self.changed.wait(guard) {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct CancelGuard {
    cancellable: Cancellable,
    id: HandlerId,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.cancellable.disconnect(self.id);
    }
}

/// Creates a pipe whose blocking waits end when `cancellable` is cancelled.
pub(crate) fn pipe(capacity: usize, cancellable: &Cancellable) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        changed: Condvar::new(),
        capacity: capacity.max(1),
    });
    let weak: Weak<Shared> = Arc::downgrade(&shared);
    let id = cancellable.connect(move || {
        if let Some(shared) = weak.upgrade() {
            shared.lock().cancelled = true;
            shared.changed.notify_all();
        }
    });
    let guard = Arc::new(CancelGuard {
        cancellable: cancellable.clone(),
        id,
    });
    (
        PipeWriter {
            shared: Arc::clone(&shared),
            _guard: Arc::clone(&guard),
        },
        PipeReader {
            shared,
            _guard: guard,
        },
    )
}

fn closed_error(state: &mut State) -> io::Error {
    match state.error.take() {
        Some(err) => err.into(),
        None => io::Error::new(io::ErrorKind::BrokenPipe, "The stream was closed"),
    }
}

/// The producing end. Dropping it signals end of stream.
pub(crate) struct PipeWriter {
    shared: Arc<Shared>,
    _guard: Arc<CancelGuard>,
}

impl PipeWriter {
    /// Closes the writing end, handing `err` to the reader.
    pub(crate) fn fail(self, err: Error) {
        {
            let mut state = self.shared.lock();
            if !state.reader_closed {
                state.error = Some(err);
            }
        }
        drop(self);
    }

    /// Returns true once the reader has gone away.
    pub(crate) fn is_reader_closed(&self) -> bool {
        self.shared.lock().reader_closed
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if state.cancelled {
                return Err(Error::cancelled().into());
            }
            if state.reader_closed {
                return Err(closed_error(&mut state));
            }
            let space = self.shared.capacity.saturating_sub(state.buf.len());
            if space > 0 {
                let n = space.min(data.len());
                state.buf.extend(&data[..n]);
                self.shared.changed.notify_all();
                return Ok(n);
            }
            state = self.shared.wait(state);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.lock().writer_closed = true;
        self.shared.changed.notify_all();
    }
}

/// The consuming end. Dropping it tells the writer to stop.
pub(crate) struct PipeReader {
    shared: Arc<Shared>,
    _guard: Arc<CancelGuard>,
}

impl PipeReader {
    /// Closes the reading end, handing `err` to the writer.
    pub(crate) fn fail(self, err: Error) {
        {
            let mut state = self.shared.lock();
            if !state.writer_closed {
                state.error = Some(err);
            }
        }
        drop(self);
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if state.cancelled {
                return Err(Error::cancelled().into());
            }
            if !state.buf.is_empty() {
                let n = buf.len().min(state.buf.len());
                for (slot, byte) in buf.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                self.shared.changed.notify_all();
                return Ok(n);
            }
            if state.writer_closed {
                return match state.error.take() {
                    Some(err) => Err(err.into()),
                    None => Ok(0),
                };
            }
            state = self.shared.wait(state);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.lock().reader_closed = true;
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdata_core::ErrorKind;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn transfers_bytes_in_order() {
        let cancellable = Cancellable::new();
        let (mut writer, mut reader) = pipe(7, &cancellable);
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let expected = payload.clone();
        let producer = thread::spawn(move || {
            writer.write_all(&payload).unwrap();
        });
        let mut received = Vec::new();
        reader.read_to_end(&mut received).unwrap();
        producer.join().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn writer_error_reaches_reader() {
        let cancellable = Cancellable::new();
        let (mut writer, mut reader) = pipe(16, &cancellable);
        writer.write_all(b"abc").unwrap();
        writer.fail(Error::not_found("gone"));

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        let err = Error::from(reader.read(&mut buf).unwrap_err());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn dropping_reader_unblocks_writer() {
        let cancellable = Cancellable::new();
        let (mut writer, reader) = pipe(4, &cancellable);
        let producer = thread::spawn(move || writer.write_all(&[0u8; 64]));
        thread::sleep(Duration::from_millis(20));
        drop(reader);
        let err = producer.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn cancellation_wakes_blocked_reader() {
        let cancellable = Cancellable::new();
        let (_writer, mut reader) = pipe(4, &cancellable);
        let consumer = thread::spawn(move || {
            let mut buf = [0u8; 4];
            reader.read(&mut buf).map_err(Error::from)
        });
        thread::sleep(Duration::from_millis(20));
        cancellable.cancel();
        let err = consumer.join().unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn reader_error_reaches_writer() {
        let cancellable = Cancellable::new();
        let (mut writer, reader) = pipe(4, &cancellable);
        let producer = thread::spawn(move || writer.write_all(&[0u8; 64]));
        thread::sleep(Duration::from_millis(20));
        reader.fail(Error::forbidden("no").with_status(403));
        let err = Error::from(producer.join().unwrap().unwrap_err());
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.status(), Some(403));
    }
}
