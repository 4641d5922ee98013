//! pkt-line encode/decode.

use super::service::GitService;

/// Frame one pkt-line: 4 hex digits of total length, then the payload.
pub fn encode_pkt_line(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + data.len());
    let len = 4 + data.len();
    out.extend_from_slice(format!("{len:04x}").as_bytes());
    out.extend_from_slice(data);
    out
}

pub const PKT_FLUSH: &[u8] = b"0000";

/// The banner preceding a ref advertisement:
/// `<len># service=git-<svc>\n` followed by a flush packet.
pub fn service_banner(service: GitService) -> Vec<u8> {
    let line = format!("# service=git-{}\n", service.name());
    let mut out = encode_pkt_line(line.as_bytes());
    out.extend_from_slice(PKT_FLUSH);
    out
}

/// One frame of a pkt-line stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Pkt<'a> {
    Data(&'a [u8]),
    Flush,
}

/// Decode the leading pkt-line of `buf`.
///
/// Returns the frame and the bytes it consumed, `Ok(None)` when the frame is
/// still incomplete, and `Err` when the prefix is not pkt-line framed.
pub fn decode_pkt(buf: &[u8]) -> anyhow::Result<Option<(Pkt<'_>, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = usize::from_str_radix(std::str::from_utf8(&buf[..4])?, 16)?;
    if len == 0 {
        return Ok(Some((Pkt::Flush, 4)));
    }
    if len < 4 {
        anyhow::bail!("invalid pkt-line length {len}");
    }
    if buf.len() < len {
        return Ok(None);
    }
    Ok(Some((Pkt::Data(&buf[4..len]), len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_pkt_line() {
        let msg = b"hello\n";
        let enc = encode_pkt_line(msg);
        assert_eq!(&enc[..4], b"000a");
        let (pkt, consumed) = decode_pkt(&enc).unwrap().unwrap();
        assert_eq!(pkt, Pkt::Data(msg));
        assert_eq!(consumed, enc.len());
    }

    #[test]
    fn upload_pack_banner_layout() {
        let banner = service_banner(GitService::UploadPack);
        assert!(banner.starts_with(b"001e# service=git-upload-pack\n"));
        assert!(banner.ends_with(PKT_FLUSH));
    }

    #[test]
    fn receive_pack_banner_layout() {
        let banner = service_banner(GitService::ReceivePack);
        assert!(banner.starts_with(b"001f# service=git-receive-pack\n"));
        assert!(banner.ends_with(PKT_FLUSH));
    }

    #[test]
    fn decode_flush() {
        let (pkt, consumed) = decode_pkt(PKT_FLUSH).unwrap().unwrap();
        assert_eq!(pkt, Pkt::Flush);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn decode_waits_for_a_complete_frame() {
        let enc = encode_pkt_line(b"payload\n");
        assert_eq!(decode_pkt(&enc[..2]).unwrap(), None);
        assert_eq!(decode_pkt(&enc[..enc.len() - 1]).unwrap(), None);
    }

    #[test]
    fn decode_rejects_unframed_input() {
        assert!(decode_pkt(b"PACKdata").is_err());
        assert!(decode_pkt(b"0001").is_err());
    }
}
