//! In-stream detection of tag creations during a push.
//!
//! The receive-pack request body starts with a pkt-line command list
//! (`<old-oid> SP <new-oid> SP <refname>`), terminated by a flush packet,
//! then the packfile. The scanner parses that prefix incrementally as body
//! chunks stream through to the subprocess; a command split across chunk
//! boundaries is carried over and parsed exactly once.

use super::pkt;

/// Upper bound on carried bytes. A single command line is far smaller; a
/// stream that is not pkt-line framed stops the scan instead of buffering.
const MAX_CARRY: usize = 16 * 1024;

/// One `refs/tags/*` create/update seen in the command list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TagRef {
    pub new: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub(crate) struct TagScanner {
    carry: Vec<u8>,
    done: bool,
}

impl TagScanner {
    pub(crate) fn new() -> Self {
        TagScanner::default()
    }

    /// Feed one body chunk; returns the tag refs completed by it. Returns
    /// nothing once the command list has ended.
    pub(crate) fn scan(&mut self, chunk: &[u8]) -> Vec<TagRef> {
        let mut found = Vec::new();
        if self.done {
            return found;
        }

        self.carry.extend_from_slice(chunk);

        loop {
            // Flush packet means the packfile follows; unframed input has
            // nothing further to teach us either.
            let consumed = match pkt::decode_pkt(&self.carry) {
                Ok(None) => break,
                Ok(Some((pkt::Pkt::Data(line), consumed))) => {
                    if let Some(tag) = parse_command(line) {
                        found.push(tag);
                    }
                    Some(consumed)
                }
                Ok(Some((pkt::Pkt::Flush, _))) | Err(_) => None,
            };
            match consumed {
                Some(consumed) => {
                    self.carry.drain(..consumed);
                }
                None => {
                    self.stop();
                    break;
                }
            }
        }

        if self.carry.len() > MAX_CARRY {
            self.stop();
        }
        found
    }

    fn stop(&mut self) {
        self.done = true;
        self.carry = Vec::new();
    }
}

/// Parse one command line. The first command may carry a NUL-separated
/// capability list; a deletion (all-zero new oid) is not a tag creation.
fn parse_command(line: &[u8]) -> Option<TagRef> {
    let line = match line.iter().position(|&b| b == 0) {
        Some(nul) => &line[..nul],
        None => line,
    };
    let text = std::str::from_utf8(line).ok()?;
    let text = text.trim_end_matches('\n');

    let (old, rest) = text.split_once(' ')?;
    let (new, refname) = rest.split_once(' ')?;
    let name = refname.strip_prefix("refs/tags/")?;

    if name.is_empty() || !is_hex_oid(old) || !is_hex_oid(new) {
        return None;
    }
    if new.bytes().all(|b| b == b'0') {
        return None;
    }

    Some(TagRef {
        new: new.to_string(),
        name: name.to_string(),
    })
}

fn is_hex_oid(s: &str) -> bool {
    (s.len() == 40 || s.len() == 64) && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_http::pkt::{encode_pkt_line, PKT_FLUSH};

    const OLD: &str = "0000000000000000000000000000000000000000";
    const NEW: &str = "1234567890abcdef1234567890abcdef12345678";

    fn command(old: &str, new: &str, refname: &str) -> Vec<u8> {
        encode_pkt_line(format!("{old} {new} {refname}\n").as_bytes())
    }

    #[test]
    fn detects_tag_creation() {
        let mut scanner = TagScanner::new();
        let mut body = command(OLD, NEW, "refs/tags/v1.0.0");
        body.extend_from_slice(PKT_FLUSH);

        let tags = scanner.scan(&body);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "v1.0.0");
        assert_eq!(tags[0].new, NEW);
    }

    #[test]
    fn ignores_branches_and_deletions() {
        let mut scanner = TagScanner::new();
        let mut body = command(OLD, NEW, "refs/heads/main");
        body.extend_from_slice(&command(NEW, OLD, "refs/tags/gone"));
        body.extend_from_slice(PKT_FLUSH);

        assert!(scanner.scan(&body).is_empty());
    }

    #[test]
    fn first_command_capabilities_are_stripped() {
        let mut scanner = TagScanner::new();
        let line = format!("{OLD} {NEW} refs/tags/v2\0report-status side-band-64k\n");
        let mut body = encode_pkt_line(line.as_bytes());
        body.extend_from_slice(PKT_FLUSH);

        let tags = scanner.scan(&body);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "v2");
    }

    #[test]
    fn match_survives_a_chunk_boundary() {
        let mut body = command(OLD, NEW, "refs/tags/split");
        body.extend_from_slice(PKT_FLUSH);

        // Split inside the refname, every possible way.
        for cut in 1..body.len() {
            let mut scanner = TagScanner::new();
            let mut tags = scanner.scan(&body[..cut]);
            tags.extend(scanner.scan(&body[cut..]));
            assert_eq!(tags.len(), 1, "lost match at cut {cut}");
            assert_eq!(tags[0].name, "split");
        }
    }

    #[test]
    fn scanning_stops_at_the_packfile() {
        let mut scanner = TagScanner::new();
        let mut body = command(OLD, NEW, "refs/heads/main");
        body.extend_from_slice(PKT_FLUSH);
        scanner.scan(&body);

        // Pack data that happens to contain a plausible command line must
        // not be reported.
        let decoy = command(OLD, NEW, "refs/tags/decoy");
        assert!(scanner.scan(&decoy).is_empty());
    }

    #[test]
    fn unframed_input_is_abandoned() {
        let mut scanner = TagScanner::new();
        assert!(scanner.scan(b"PACKxxxxnot-pkt-lines").is_empty());
        assert!(scanner.done);
    }

    #[test]
    fn multiple_tags_in_one_push() {
        let mut scanner = TagScanner::new();
        let other = "abcdefabcdefabcdefabcdefabcdefabcdefabcd";
        let mut body = command(OLD, NEW, "refs/tags/v1");
        body.extend_from_slice(&command(OLD, other, "refs/tags/v2"));
        body.extend_from_slice(PKT_FLUSH);

        let tags = scanner.scan(&body);
        assert_eq!(
            tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            vec!["v1", "v2"]
        );
    }
}
