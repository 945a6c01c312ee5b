// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Cursor;

use super::*;

#[tokio::test]
async fn yields_lf_and_crlf_lines() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(Cursor::new(b"one\ntwo\r\nthree".to_vec()));
    assert_eq!(framer.next_line().await?, Some("one".to_owned()));
    assert_eq!(framer.next_line().await?, Some("two".to_owned()));
    assert_eq!(framer.next_line().await?, Some("three".to_owned()));
    assert_eq!(framer.next_line().await?, None);
    Ok(())
}

#[tokio::test]
async fn tolerates_partial_reads_across_many_chunks() -> anyhow::Result<()> {
    struct Chunked {
        chunks: Vec<Vec<u8>>,
    }

    impl AsyncRead for Chunked {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if let Some(chunk) = self.chunks.pop() {
                buf.put_slice(&chunk);
            }
            std::task::Poll::Ready(Ok(()))
        }
    }

    // pop() takes from the back, so list chunks in reverse emission order:
    // the last element ("he") is popped (and thus read) first.
    let chunks: Vec<Vec<u8>> = vec![b"llo\n".to_vec(), b"he".to_vec()];
    let mut framer = LineFramer::new(Chunked { chunks });
    assert_eq!(framer.next_line().await?, Some("hello".to_owned()));
    Ok(())
}

#[tokio::test]
async fn skips_empty_lines() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(Cursor::new(b"\n\nfoo\n".to_vec()));
    assert_eq!(framer.next_line().await?, Some("foo".to_owned()));
    Ok(())
}

#[tokio::test]
async fn discards_oversized_line_and_resyncs() -> anyhow::Result<()> {
    let long_line = vec![b'a'; 64];
    let mut data = long_line.clone();
    data.push(b'\n');
    data.extend_from_slice(b"short\n");

    let mut framer = LineFramer::with_max_line_bytes(Cursor::new(data), 16);
    assert_eq!(framer.next_line().await?, Some("short".to_owned()));
    Ok(())
}
