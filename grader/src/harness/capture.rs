//! Bounded stream capture

use tokio::io::{AsyncRead, AsyncReadExt};

/// Appended to output that hit the capture cap
pub const TRUNCATION_MARKER: &str = "...[output truncated]";

const CHUNK_SIZE: usize = 8192;

/// Bytes read from a stream, at most `cap` of them kept
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

/// Read `reader` to EOF, keeping the first `cap` bytes.
///
/// Bytes past the cap are still drained so the writer never blocks on a
/// full pipe.
pub async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(captured.bytes.len());
        let take = n.min(room);
        captured.bytes.extend_from_slice(&chunk[..take]);
        if take < n {
            captured.truncated = true;
        }
    }
    Ok(captured)
}

/// Decode captured output: lossy UTF-8, one trailing newline removed, and the
/// truncation marker on its own line when the cap was hit
pub fn finish_output(captured: &Captured) -> String {
    let mut text = String::from_utf8_lossy(&captured.bytes).into_owned();
    if text.ends_with('\n') {
        text.pop();
    }
    if captured.truncated {
        text.push('\n');
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_under_cap() {
        let data: &[u8] = b"hello\nworld\n";
        let captured = read_capped(data, 100).await.unwrap();
        assert!(!captured.truncated);
        assert_eq!(finish_output(&captured), "hello\nworld");
    }

    #[tokio::test]
    async fn test_read_over_cap_drains_and_flags() {
        let data = vec![b'y'; 50_000];
        let captured = read_capped(data.as_slice(), 1000).await.unwrap();
        assert!(captured.truncated);
        assert_eq!(captured.bytes.len(), 1000);
        let text = finish_output(&captured);
        assert!(text.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_exact_cap_is_not_truncated() {
        let captured = tokio_test::block_on(read_capped(&b"abcd"[..], 4)).unwrap();
        assert!(!captured.truncated);
        assert_eq!(finish_output(&captured), "abcd");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let captured = Captured {
            bytes: vec![b'o', b'k', 0xff],
            truncated: false,
        };
        assert_eq!(finish_output(&captured), "ok\u{fffd}");
    }
}
