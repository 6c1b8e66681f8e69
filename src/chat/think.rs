//! Split `<think>…</think>` blocks out of streamed response text

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// A piece of streamed text routed to the answer or the reasoning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Response(String),
    Reasoning(String),
}

/// Incremental think-tag splitter.
///
/// Tags may be cut anywhere by the stream, so a suffix that could still grow
/// into a tag is held back until the next chunk arrives.
#[derive(Debug, Clone, Default)]
pub struct ThinkTagSplitter {
    held: String,
    in_think: bool,
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and get back every segment that is now unambiguous
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        let mut pending = std::mem::take(&mut self.held);
        pending.push_str(chunk);

        let mut segments = Vec::new();
        let mut rest = pending.as_str();
        loop {
            let tag = if self.in_think { CLOSE_TAG } else { OPEN_TAG };
            match rest.find(tag) {
                Some(index) => {
                    self.emit(&mut segments, &rest[..index]);
                    rest = &rest[index + tag.len()..];
                    self.in_think = !self.in_think;
                }
                None => {
                    let hold = partial_tag_len(rest, tag);
                    let (ready, held) = rest.split_at(rest.len() - hold);
                    self.emit(&mut segments, ready);
                    self.held = held.to_string();
                    break;
                }
            }
        }
        segments
    }

    /// Release held text. The think state is kept; drop the splitter to
    /// start a new turn.
    pub fn finish(&mut self) -> Option<Segment> {
        if self.held.is_empty() {
            return None;
        }
        let held = std::mem::take(&mut self.held);
        Some(self.segment(held))
    }

    pub fn is_holding(&self) -> bool {
        !self.held.is_empty()
    }

    pub fn in_think(&self) -> bool {
        self.in_think
    }

    fn emit(&self, segments: &mut Vec<Segment>, text: &str) {
        if !text.is_empty() {
            segments.push(self.segment(text.to_string()));
        }
    }

    fn segment(&self, text: String) -> Segment {
        if self.in_think {
            Segment::Reasoning(text)
        } else {
            Segment::Response(text)
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}
