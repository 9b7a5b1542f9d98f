//! Consistent-overhead-byte-stuffing frame decoder.
//!
//! On the wire every datagram ends with a zero byte, and COBS guarantees
//! zero appears nowhere else: each code byte `c` announces `c - 1` literal
//! bytes followed by an implied zero, with `c == 0xFF` encoding a full
//! 254-byte run with no implied zero. De-stuffing therefore alternates one
//! single-byte read (the code) with one bulk read (the run), which also
//! keeps the blocking reads aligned with the sender's writes.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Read and decode one COBS frame from `port` into `out`.
///
/// Returns the decoded payload length, `Ok(Some(0))` for an empty frame
/// (callers skip those), or `Ok(None)` when the stream has ended. I/O
/// errors propagate; callers treat them as end-of-stream too.
///
/// `out.len()` bounds the decoded frame. If a frame runs past it (a lost
/// delimiter, or garbage on the line), the decoder warns, drains input to
/// the next delimiter, and restarts framing, so one bad frame costs exactly
/// one packet.
pub async fn read_frame<R>(port: &mut R, out: &mut [u8]) -> std::io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    let max = out.len();
    let mut len = 0usize;

    loop {
        let code = match read_byte(port).await? {
            Some(code) => code,
            None => return Ok(None),
        };

        if code == 0 {
            // End of frame. The last block appended one zero that is not
            // part of the payload (the implied trailing terminator).
            return Ok(Some(len.saturating_sub(1)));
        }

        if len + code as usize > max {
            tracing::warn!(decoded = len, "missing frame delimiter, dropping partial frame");
            loop {
                match read_byte(port).await? {
                    Some(0) => break,
                    Some(_) => {}
                    None => return Ok(None),
                }
            }
            len = 0;
            continue;
        }

        // Bulk-read the whole run straight into the output buffer.
        let run = code as usize - 1;
        port.read_exact(&mut out[len..len + run]).await?;
        len += run;

        // 0xFF means a maximal 254-byte run with no zero after it.
        if code != 0xFF {
            out[len] = 0;
            len += 1;
        }
    }
}

async fn read_byte<R: AsyncRead + Unpin>(port: &mut R) -> std::io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match port.read(&mut byte).await? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    /// Reference encoder, used only to drive the decoder. Emits the
    /// trailing frame delimiter.
    fn cobs_encode(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + payload.len() / 254 + 2);
        let mut block: Vec<u8> = Vec::with_capacity(254);
        for &byte in payload {
            if byte == 0 {
                out.push(block.len() as u8 + 1);
                out.append(&mut block);
            } else {
                block.push(byte);
                if block.len() == 254 {
                    out.push(0xFF);
                    out.append(&mut block);
                }
            }
        }
        out.push(block.len() as u8 + 1);
        out.append(&mut block);
        out.push(0);
        out
    }

    async fn decode_all(wire: &[u8], max: usize) -> Vec<Vec<u8>> {
        let (mut tx, mut rx) = tokio::io::duplex(1 << 16);
        tx.write_all(wire).await.unwrap();
        drop(tx);

        let mut frames = Vec::new();
        let mut buf = vec![0u8; max];
        while let Some(len) = read_frame(&mut rx, &mut buf).await.unwrap() {
            frames.push(buf[..len].to_vec());
        }
        frames
    }

    #[tokio::test]
    async fn encode_decode_is_identity() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x01],
            vec![0x00],
            vec![0x01, 0x02],
            vec![0x11, 0x00, 0x22, 0x00, 0x33],
            vec![0x00, 0x00, 0x00],
            (1..=254u8).collect(),           // one maximal run
            (0..=255u8).cycle().take(1000).collect(),
        ];

        for case in cases {
            let frames = decode_all(&cobs_encode(&case), 2048).await;
            assert_eq!(frames, vec![case.clone()], "payload {:02x?}", &case);
        }
    }

    #[tokio::test]
    async fn back_to_back_frames_decode_in_order() {
        let mut wire = Vec::new();
        let a = vec![0xDE, 0xAD, 0x00, 0xBE, 0xEF];
        let b = vec![0x42; 300];
        wire.extend(cobs_encode(&a));
        wire.extend(cobs_encode(&b));

        assert_eq!(decode_all(&wire, 1024).await, vec![a, b]);
    }

    #[tokio::test]
    async fn empty_frame_decodes_to_zero_length() {
        // A lone delimiter is a zero-length frame, not an error.
        let frames = decode_all(&[0x00], 64).await;
        assert_eq!(frames, vec![Vec::<u8>::new()]);
    }

    #[tokio::test]
    async fn overlong_run_resyncs_at_next_delimiter() {
        // Three tiny blocks, then a 254-byte run that cannot fit in a
        // 64-byte frame and never sees its delimiter.
        let mut wire = vec![0x01, 0x01, 0x01, 0xFF];
        wire.extend(std::iter::repeat(0x55u8).take(252));
        wire.push(0x00);
        // A well-formed frame follows; it must come through intact.
        let good = vec![0x41, 0x42, 0x43];
        wire.extend(cobs_encode(&good));

        let frames = decode_all(&wire, 64).await;
        assert_eq!(frames, vec![good]);
    }

    #[tokio::test]
    async fn eof_mid_frame_ends_the_stream() {
        // Code byte promises 9 literals but the stream dies after 3.
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(&[0x0A, 0x01, 0x02, 0x03]).await.unwrap();
        drop(tx);

        let mut buf = [0u8; 64];
        assert!(read_frame(&mut rx, &mut buf).await.is_err());
    }

    #[tokio::test]
    async fn decoded_length_bound_counts_the_implied_terminator() {
        // The running length includes one transient zero for the implied
        // terminator, so the largest single-block payload a 64-byte buffer
        // accepts is 63 bytes; 64 trips the resync path instead.
        let fits: Vec<u8> = (1..=63u8).collect();
        assert_eq!(decode_all(&cobs_encode(&fits), 64).await, vec![fits]);

        let too_big: Vec<u8> = (1..=64u8).collect();
        let frames = decode_all(&cobs_encode(&too_big), 64).await;
        assert!(frames.is_empty());
    }
}
