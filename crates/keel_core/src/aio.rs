// aio.rs - asynchronous file I/O port
//
// A uniform completion-port abstraction: submissions enqueue onto a shared
// queue, blocking workers perform positioned reads/writes, and completions
// are drained by whoever calls `process_events`. Each request's callback
// fires exactly once, on the draining thread.

use std::fs::File;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;

/// Largest single positioned write issued by a worker; bigger requests are
/// split into several calls at the same growing offset.
const MAX_WRITE_CHUNK: usize = i32::MAX as usize;

#[derive(Debug, Error)]
pub enum AioError {
    #[error("failed to start aio worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortInfo {
    pub worker_limit: u32,
}

impl Default for PortInfo {
    fn default() -> Self {
        PortInfo { worker_limit: 1 }
    }
}

/// Outcome of submitting a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Data already delivered (never produced by the queue-backed port).
    Completed,
    /// The callback will fire from a later `process_events` call.
    Pending,
    /// Submission failed; the callback will not fire.
    Error,
}

/// Result delivered to a request callback.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestResult {
    Success,
    Error,
}

#[derive(Copy, Clone, Debug)]
pub struct ProcessLimits {
    pub events_max: u32,
    pub timeout: Duration,
}

enum Submission {
    Read {
        file: Arc<File>,
        offset: u64,
        size: usize,
        buffer: Vec<u8>,
        callback: Box<dyn FnOnce(RequestResult, usize, Vec<u8>) + Send>,
    },
    Write {
        file: Arc<File>,
        offset: u64,
        data: Vec<u8>,
        callback: Box<dyn FnOnce(RequestResult, usize) + Send>,
    },
}

/// A finished request, ready to fire its callback on the draining thread.
struct Completion {
    run: Box<dyn FnOnce() + Send>,
}

/// Completion port over blocking positioned file I/O.
///
/// Workers block on the submission queue; `process_events` blocks on the
/// completion queue. Dropping (or `close`-ing) the port stops accepting
/// work, lets in-flight requests finish, and fires their callbacks.
pub struct AioPort {
    submissions: Option<Sender<Submission>>,
    completions: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    worker_limit: u32,
}

impl AioPort {
    pub fn open(info: PortInfo) -> Result<AioPort, AioError> {
        let worker_limit = info.worker_limit.max(1);
        let (submit_tx, submit_rx) = unbounded::<Submission>();
        let (complete_tx, complete_rx) = unbounded::<Completion>();

        let mut workers = Vec::with_capacity(worker_limit as usize);
        for index in 0..worker_limit {
            let submissions = submit_rx.clone();
            let completions = complete_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("keel-aio-{index}"))
                .spawn(move || worker_loop(submissions, completions))?;
            workers.push(handle);
        }

        Ok(AioPort {
            submissions: Some(submit_tx),
            completions: complete_rx,
            workers,
            worker_limit,
        })
    }

    pub fn worker_limit(&self) -> u32 {
        self.worker_limit
    }

    /// Associate a file with the port. The queue-backed port needs no
    /// native registration, so this always succeeds.
    pub fn bind(&self, _file: &File) -> bool {
        true
    }

    /// Submit a positioned read of `size` bytes. The buffer is resized by
    /// the worker and handed back to the callback with the byte count.
    pub fn read_request(
        &self,
        file: Arc<File>,
        offset: u64,
        size: usize,
        buffer: Vec<u8>,
        callback: impl FnOnce(RequestResult, usize, Vec<u8>) + Send + 'static,
    ) -> RequestStatus {
        let Some(submissions) = &self.submissions else {
            return RequestStatus::Error;
        };
        let sent = submissions.send(Submission::Read {
            file,
            offset,
            size,
            buffer,
            callback: Box::new(callback),
        });
        match sent {
            Ok(()) => RequestStatus::Pending,
            Err(_) => RequestStatus::Error,
        }
    }

    /// Submit a positioned write of `data`. Writes larger than the per-call
    /// limit are split internally; the callback sees the total.
    pub fn write_request(
        &self,
        file: Arc<File>,
        offset: u64,
        data: Vec<u8>,
        callback: impl FnOnce(RequestResult, usize) + Send + 'static,
    ) -> RequestStatus {
        let Some(submissions) = &self.submissions else {
            return RequestStatus::Error;
        };
        let sent = submissions.send(Submission::Write {
            file,
            offset,
            data,
            callback: Box::new(callback),
        });
        match sent {
            Ok(()) => RequestStatus::Pending,
            Err(_) => RequestStatus::Error,
        }
    }

    /// Drain up to `events_max` completions, invoking each callback. Blocks
    /// up to `timeout` for the first completion; after one arrives the
    /// remaining queue is drained without blocking again.
    pub fn process_events(&self, limits: ProcessLimits) -> u32 {
        let mut completed = 0u32;
        let mut timeout = limits.timeout;

        while completed < limits.events_max {
            match self.completions.recv_timeout(timeout) {
                Ok(completion) => {
                    (completion.run)();
                    completed += 1;
                    timeout = Duration::ZERO;
                }
                Err(_) => break,
            }
        }
        completed
    }

    /// Stop accepting submissions, wait for in-flight requests, and fire
    /// any callbacks still queued.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes every idle worker with a disconnect.
        self.submissions = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        while let Ok(completion) = self.completions.try_recv() {
            (completion.run)();
        }
    }
}

impl Drop for AioPort {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(submissions: Receiver<Submission>, completions: Sender<Completion>) {
    while let Ok(submission) = submissions.recv() {
        let completion = match submission {
            Submission::Read {
                file,
                offset,
                size,
                mut buffer,
                callback,
            } => {
                buffer.resize(size, 0);
                match read_full_at(&file, offset, &mut buffer) {
                    Ok(bytes) => Completion {
                        run: Box::new(move || callback(RequestResult::Success, bytes, buffer)),
                    },
                    Err(error) => {
                        tracing::debug!(%error, offset, size, "aio read failed");
                        Completion {
                            run: Box::new(move || callback(RequestResult::Error, 0, buffer)),
                        }
                    }
                }
            }
            Submission::Write {
                file,
                offset,
                data,
                callback,
            } => match write_full_at(&file, offset, &data) {
                Ok(bytes) => Completion {
                    run: Box::new(move || callback(RequestResult::Success, bytes)),
                },
                Err(error) => {
                    tracing::debug!(%error, offset, "aio write failed");
                    Completion {
                        run: Box::new(move || callback(RequestResult::Error, 0)),
                    }
                }
            },
        };

        if completions.send(completion).is_err() {
            // Port gone while we were working; nobody can drain us anymore.
            break;
        }
    }
}

/// Positioned read looping until the buffer is full or EOF.
fn read_full_at(file: &File, mut offset: u64, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0usize;
    while total < buffer.len() {
        let read = positioned_read(file, offset, &mut buffer[total..])?;
        if read == 0 {
            break;
        }
        total += read;
        offset += read as u64;
    }
    Ok(total)
}

/// Positioned write, split into bounded chunks.
fn write_full_at(file: &File, mut offset: u64, data: &[u8]) -> std::io::Result<usize> {
    let mut remaining = data;
    let mut total = 0usize;
    while !remaining.is_empty() {
        let chunk = &remaining[..remaining.len().min(MAX_WRITE_CHUNK)];
        let written = positioned_write(file, offset, chunk)?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "positioned write made no progress",
            ));
        }
        total += written;
        offset += written as u64;
        remaining = &remaining[written..];
    }
    Ok(total)
}

#[cfg(unix)]
fn positioned_read(file: &File, offset: u64, buffer: &mut [u8]) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buffer, offset)
}

#[cfg(windows)]
fn positioned_read(file: &File, offset: u64, buffer: &mut [u8]) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buffer, offset)
}

#[cfg(unix)]
fn positioned_write(file: &File, offset: u64, data: &[u8]) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(data, offset)
}

#[cfg(windows)]
fn positioned_write(file: &File, offset: u64, data: &[u8]) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(data, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn temp_file_with(content: &[u8]) -> (tempfile::TempDir, Arc<File>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content)
            .unwrap();
        let file = Arc::new(File::open(&path).unwrap());
        (dir, file)
    }

    #[test]
    fn test_single_read_completes() {
        let content: Vec<u8> = (0..100u8).collect();
        let (_dir, file) = temp_file_with(&content);

        let port = AioPort::open(PortInfo { worker_limit: 1 }).unwrap();
        assert!(port.bind(&file));

        let received: Arc<Mutex<Option<(RequestResult, usize, Vec<u8>)>>> =
            Arc::new(Mutex::new(None));
        let sink = Arc::clone(&received);

        let status = port.read_request(file, 0, 100, Vec::new(), move |result, bytes, buffer| {
            *sink.lock().unwrap() = Some((result, bytes, buffer));
        });
        assert_eq!(status, RequestStatus::Pending);

        let completed = port.process_events(ProcessLimits {
            events_max: 16,
            timeout: Duration::from_secs(1),
        });
        assert_eq!(completed, 1);

        let (result, bytes, buffer) = received.lock().unwrap().take().unwrap();
        assert_eq!(result, RequestResult::Success);
        assert_eq!(bytes, 100);
        assert_eq!(buffer, content);
    }

    #[test]
    fn test_every_submission_completes_exactly_once() {
        let content = vec![7u8; 4096];
        let (_dir, file) = temp_file_with(&content);

        let port = AioPort::open(PortInfo { worker_limit: 3 }).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        const N: usize = 16;
        for i in 0..N {
            let fired = Arc::clone(&fired);
            let status = port.read_request(
                Arc::clone(&file),
                (i * 16) as u64,
                16,
                Vec::new(),
                move |result, bytes, _| {
                    assert_eq!(result, RequestResult::Success);
                    assert_eq!(bytes, 16);
                    fired.fetch_add(1, Ordering::SeqCst);
                },
            );
            assert_eq!(status, RequestStatus::Pending);
        }

        // Drain across however many calls it takes.
        let mut total = 0;
        while total < N as u32 {
            let drained = port.process_events(ProcessLimits {
                events_max: 4,
                timeout: Duration::from_secs(1),
            });
            assert!(drained > 0, "drain made no progress");
            total += drained;
        }
        assert_eq!(total, N as u32);
        assert_eq!(fired.load(Ordering::SeqCst), N);

        // Nothing left: a zero-timeout poll returns immediately empty.
        let extra = port.process_events(ProcessLimits {
            events_max: 4,
            timeout: Duration::from_millis(10),
        });
        assert_eq!(extra, 0);
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let file = Arc::new(
            std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .unwrap(),
        );

        let port = AioPort::open(PortInfo { worker_limit: 1 }).unwrap();
        let payload: Vec<u8> = (0..64u8).collect();

        let wrote = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&wrote);
        port.write_request(Arc::clone(&file), 8, payload.clone(), move |result, bytes| {
            assert_eq!(result, RequestResult::Success);
            sink.store(bytes, Ordering::SeqCst);
        });

        assert_eq!(
            port.process_events(ProcessLimits {
                events_max: 1,
                timeout: Duration::from_secs(1),
            }),
            1
        );
        assert_eq!(wrote.load(Ordering::SeqCst), 64);

        let read_back = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&read_back);
        port.read_request(file, 8, 64, Vec::new(), move |_, _, buffer| {
            *sink.lock().unwrap() = buffer;
        });
        port.process_events(ProcessLimits {
            events_max: 1,
            timeout: Duration::from_secs(1),
        });
        assert_eq!(*read_back.lock().unwrap(), payload);
    }

    #[test]
    fn test_timeout_without_work() {
        let port = AioPort::open(PortInfo::default()).unwrap();
        let start = std::time::Instant::now();
        let completed = port.process_events(ProcessLimits {
            events_max: 1,
            timeout: Duration::from_millis(50),
        });
        assert_eq!(completed, 0);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_close_fires_inflight_callbacks() {
        let content = vec![1u8; 256];
        let (_dir, file) = temp_file_with(&content);

        let port = AioPort::open(PortInfo { worker_limit: 1 }).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let fired = Arc::clone(&fired);
            port.read_request(Arc::clone(&file), 0, 256, Vec::new(), move |_, _, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        port.close();
        assert_eq!(fired.load(Ordering::SeqCst), 4);
    }
}
