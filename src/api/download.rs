// Saving a download to disk.

use super::result::{DownloadStream, Failure, FailureKind, OperationResult, Payload, Success};
use reqwest::blocking::Response;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tracing::{info, warn};

const OPERATION: &str = "download";
const BUFFER_SIZE: usize = 64 * 1024;

/// Reject a destination whose directory does not exist, before any request.
pub(crate) fn check_destination(destination: &Path) -> Result<(), Failure> {
    match destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) if !dir.is_dir() => Err(Failure::local(
            OPERATION,
            format!("destination directory {} does not exist", dir.display()),
        )),
        _ => Ok(()),
    }
}

/// Leave the body unread for the caller.
pub(crate) fn into_stream(remote_path: &str, response: Response) -> OperationResult {
    Ok(Success::new(
        format!("Streaming {remote_path}"),
        Payload::Stream(DownloadStream::new(response)),
    ))
}

/// Stream the body into `destination`. A partial file is removed on error.
pub(crate) fn save(remote_path: &str, response: Response, destination: &Path) -> OperationResult {
    let file = File::create(destination).map_err(|e| Failure::local(OPERATION, e))?;
    let mut writer = BufWriter::new(file);
    let mut reader = DownloadStream::new(response);

    match pump(&mut reader, &mut writer) {
        Ok(bytes) => {
            info!(remote = remote_path, local = %destination.display(), bytes, "download saved");
            Ok(Success::new(
                format!("Downloaded {remote_path} to {}", destination.display()),
                Payload::Saved {
                    local_path: destination.to_path_buf(),
                    bytes,
                },
            ))
        }
        Err(failure) => {
            drop(writer);
            if let Err(e) = fs::remove_file(destination) {
                warn!(
                    local = %destination.display(),
                    error = %e,
                    "could not remove partial download"
                );
            }
            Err(failure)
        }
    }
}

/// Copy until EOF. Read errors are transport failures, write errors local ones.
fn pump<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<u64, Failure> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let mut failure = Failure::local(OPERATION, e);
                failure.kind = FailureKind::Transport;
                return Err(failure);
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| Failure::local(OPERATION, e))?;
        total += n as u64;
    }
    writer.flush().map_err(|e| Failure::local(OPERATION, e))?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct BrokenDisk;

    impl Write for BrokenDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWire;

    impl Read for BrokenWire {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
        }
    }

    #[test]
    fn pump_copies_everything() {
        let data = vec![42u8; BUFFER_SIZE * 2 + 17];
        let mut out = Vec::new();
        let copied = pump(&mut Cursor::new(data.clone()), &mut out).unwrap();
        assert_eq!(copied, data.len() as u64);
        assert_eq!(out, data);
    }

    #[test]
    fn write_error_is_local_with_underlying_message() {
        let failure = pump(&mut Cursor::new(vec![1u8; 10]), &mut BrokenDisk)
            .err()
            .unwrap();
        assert_eq!(failure.kind, FailureKind::Local);
        assert_eq!(failure.message, "disk full");
        assert_eq!(failure.operation, "download");
    }

    #[test]
    fn read_error_is_transport() {
        let failure = pump(&mut BrokenWire, &mut Vec::new()).err().unwrap();
        assert_eq!(failure.kind, FailureKind::Transport);
        assert_eq!(failure.status, None);
    }

    #[test]
    fn destination_directory_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_destination(&dir.path().join("out.txt")).is_ok());
        assert!(check_destination(Path::new("out.txt")).is_ok());
        let failure = check_destination(&dir.path().join("missing").join("out.txt"))
            .err()
            .unwrap();
        assert!(failure.message.contains("does not exist"));
    }
}
