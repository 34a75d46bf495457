use log::{debug, warn};

const REC_DATA: u8 = 0;
const REC_EOF: u8 = 1;

/// Decode record-oriented hex text (the linker's `.ihx` output) into a
/// flat image of exactly `size` bytes, zero-filled where no record wrote.
/// `base` is subtracted from every record address, so callers size the
/// image to the target ROM window.
///
/// Lenient by contract: lines without the record marker are skipped,
/// short or odd-length records are truncated rather than rejected, and
/// unknown record types are logged and ignored, matching the reference
/// toolchain's tolerance for its own noise. The checksum is verified but
/// a mismatch only warns; decoding continues regardless.
pub fn decode(text: &str, base: u32, size: usize) -> Vec<u8> {
    let mut image = vec![0u8; size];

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if !line.starts_with(':') {
            continue;
        }

        let bytes = parse_hex_bytes(&line[1..]);
        if bytes.len() < 4 {
            debug!("hex record on line {} too short, skipped", idx + 1);
            continue;
        }

        let count = bytes[0] as usize;
        let addr = ((bytes[1] as u32) << 8) | bytes[2] as u32;
        let rectype = bytes[3];
        let payload_end = bytes.len().min(4 + count);
        let payload = &bytes[4..payload_end];

        if bytes.len() > 4 + count {
            let sum = bytes[..4 + count]
                .iter()
                .fold(0u8, |acc, b| acc.wrapping_add(*b));
            if sum.wrapping_add(bytes[4 + count]) != 0 {
                warn!("hex record checksum mismatch on line {}", idx + 1);
            }
        }

        match rectype {
            REC_DATA => {
                for (i, b) in payload.iter().enumerate() {
                    match addr.checked_sub(base) {
                        Some(rel) if (rel as usize) + i < size => {
                            image[rel as usize + i] = *b;
                        }
                        _ => debug!(
                            "hex record byte at {:04x} outside rom window, dropped",
                            addr + i as u32
                        ),
                    }
                }
            }
            REC_EOF => break,
            other => debug!("hex record type {} on line {} skipped", other, idx + 1),
        }
    }

    image
}

fn parse_hex_bytes(raw: &str) -> Vec<u8> {
    let raw = raw.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len() / 2);
    for pair in raw.chunks(2) {
        if pair.len() < 2 {
            break;
        }
        match std::str::from_utf8(pair)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok())
        {
            Some(b) => bytes.push(b),
            // Truncate at the first garbage pair.
            None => break,
        }
    }
    bytes
}
