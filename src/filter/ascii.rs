use crate::error::{PdfError, PdfResult};

pub(crate) fn decode_ascii_hex(stream: &[u8]) -> PdfResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(stream.len() / 2);
    let mut pending: Option<u8> = None;

    for &b in stream {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            b'>' => break,
            b if b.is_ascii_whitespace() || b == b'\0' => continue,
            b => {
                anyhow::bail!(PdfError::Filter(format!(
                    "invalid byte {:?} in ASCIIHex data",
                    char::from(b)
                )));
            }
        };

        match pending.take() {
            Some(hi) => buffer.push(hi * 16 + digit),
            None => pending = Some(digit),
        }
    }

    // a trailing odd digit is treated as if followed by zero
    if let Some(hi) = pending {
        buffer.push(hi * 16);
    }

    Ok(buffer)
}

fn decode_ascii_85_digit(digit: u8, n: &mut u32, count: &mut u8) -> PdfResult<()> {
    if !(b'!'..=b'u').contains(&digit) {
        anyhow::bail!(PdfError::Filter(format!(
            "invalid byte {:?} in ASCII85 data",
            char::from(digit)
        )));
    }

    *n = n
        .checked_mul(85)
        .and_then(|n| n.checked_add(u32::from(digit - b'!')))
        .ok_or_else(|| PdfError::Filter("ASCII85 group overflows 32 bits".into()))?;
    *count += 1;

    Ok(())
}

pub(crate) fn decode_ascii_85(mut stream: &[u8]) -> PdfResult<Vec<u8>> {
    if stream.starts_with(b"<~") {
        stream = &stream[2..];
    }

    let mut buffer = Vec::with_capacity((stream.len() / 5) * 4);

    let mut iter = stream.iter().filter(|&&b| !b.is_ascii_whitespace());

    let mut n: u32 = 0;
    let mut count = 0u8;

    while let Some(&digit) = iter.next() {
        if digit == b'~' {
            if iter.next() != Some(&b'>') {
                anyhow::bail!(PdfError::Filter("truncated ASCII85 terminator".into()));
            }

            break;
        }

        if digit == b'z' {
            if count != 0 {
                anyhow::bail!(PdfError::Filter("`z` inside an ASCII85 group".into()));
            }

            buffer.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }

        decode_ascii_85_digit(digit, &mut n, &mut count)?;

        if count == 5 {
            buffer.extend_from_slice(&n.to_be_bytes());
            count = 0;
            n = 0;
        }
    }

    if count == 1 {
        anyhow::bail!(PdfError::Filter("single trailing ASCII85 digit".into()));
    }

    if count != 0 {
        let to_remove = 5 - count as usize;

        while count != 5 {
            decode_ascii_85_digit(b'u', &mut n, &mut count)?;
        }

        buffer.extend_from_slice(&n.to_be_bytes());
        buffer.drain((buffer.len() - to_remove)..);
    }

    Ok(buffer)
}
