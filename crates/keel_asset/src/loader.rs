// loader.rs - whole-cluster loading through the engine I/O port

use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use keel_core::aio::{AioPort, ProcessLimits, RequestResult, RequestStatus};

use crate::hailstorm::{ClusterView, HailstormError};

/// Read a cluster file through the I/O port, validate its header and return
/// the owned blob. The caller's thread drives completion draining.
pub fn load_cluster(
    port: &AioPort,
    file: Arc<File>,
    timeout: Duration,
) -> Result<Vec<u8>, HailstormError> {
    let size = file
        .metadata()
        .map_err(|_| HailstormError::IoError)?
        .len() as usize;

    let slot: Arc<Mutex<Option<(RequestResult, usize, Vec<u8>)>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    let status = port.read_request(file, 0, size, Vec::new(), move |result, bytes, buffer| {
        *sink.lock().unwrap() = Some((result, bytes, buffer));
    });
    if status == RequestStatus::Error {
        return Err(HailstormError::IoError);
    }

    let deadline = Instant::now() + timeout;
    loop {
        port.process_events(ProcessLimits {
            events_max: 16,
            timeout: Duration::from_millis(20),
        });

        if let Some((result, bytes, buffer)) = slot.lock().unwrap().take() {
            if result != RequestResult::Success || bytes != size {
                tracing::error!(bytes, size, "cluster read did not complete");
                return Err(HailstormError::IoError);
            }
            ClusterView::read_header(&buffer)?;
            return Ok(buffer);
        }

        if Instant::now() >= deadline {
            tracing::error!("cluster load timed out");
            return Err(HailstormError::IoError);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hailstorm::{write_cluster, ResourceData, WriteData, WriteParams};
    use keel_core::aio::PortInfo;
    use std::io::Write;

    #[test]
    fn test_load_cluster_from_disk() {
        let paths = ["models/crate.mesh"];
        let meta: &[&[u8]] = &[b"mesh-meta"];
        let payload = [3u8; 200];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[ResourceData::new(&payload)],
            ..WriteData::default()
        };
        let blob = write_cluster(&mut WriteParams::default_chunking(4096), &data).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack.hsc");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&blob)
            .unwrap();

        let port = AioPort::open(PortInfo { worker_limit: 1 }).unwrap();
        let file = Arc::new(File::open(&path).unwrap());
        let loaded = load_cluster(&port, file, Duration::from_secs(5)).unwrap();
        assert_eq!(loaded, blob);

        let view = ClusterView::read_header(&loaded).unwrap();
        let resource = view.resource(0);
        assert_eq!(view.resource_path(&resource).unwrap(), paths[0]);
        assert_eq!(view.resource_data(&resource).unwrap(), &payload);
    }

    #[test]
    fn test_load_rejects_non_cluster_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-pack.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0x55u8; 256])
            .unwrap();

        let port = AioPort::open(PortInfo { worker_limit: 1 }).unwrap();
        let file = Arc::new(File::open(&path).unwrap());
        let result = load_cluster(&port, file, Duration::from_secs(5));
        assert_eq!(result.unwrap_err(), HailstormError::InvalidArgument);
    }
}
