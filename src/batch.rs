//! IRCv3 batch assembly: `BATCH +ref` ... `BATCH -ref` groups.
//!
//! While a batch is open, inbound lines tagged `batch=ref` are held
//! instead of dispatched. When the closing `BATCH -ref` arrives, held
//! messages are replayed in receipt order, each line re-tagged with the
//! opening message's tags; nested batches replay parent before child.
//! `draft/multiline` batches collapse into a single synthesized
//! PRIVMSG/NOTICE whose text joins the fragments with newlines (or
//! nothing, when `draft/multiline-concat` is present).
//!
//! Batches whose end never arrives are dropped by a one-hour watchdog.
//!
//! # Reference
//! - <https://ircv3.net/specs/extensions/batch>
//! - <https://ircv3.net/specs/extensions/multiline>

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::message::{tags::Tag, Message};

/// Watchdog: batches older than this without an end are collected.
pub const BATCH_MAX_AGE_SECS: i64 = 3600;

/// One open (or just-closed) batch.
#[derive(Clone, Debug)]
pub struct Batch {
    /// Opaque reference from the server.
    pub reference: String,
    /// Reference of the enclosing batch, when nested.
    pub parent_ref: Option<String>,
    /// Batch type (`netjoin`, `chathistory`, `draft/multiline`, ...).
    pub batch_type: String,
    /// Parameters after the type (e.g. the multiline target).
    pub parameters: Vec<String>,
    /// Tags carried by the `BATCH +ref` message itself.
    pub tags: Vec<Tag>,
    /// Arrival time, for the watchdog.
    pub start_time: DateTime<Utc>,
    /// Raw held lines in receipt order.
    pub messages: Vec<String>,
    /// Closing `BATCH -ref` seen.
    pub end_received: bool,
    /// Held messages already replayed.
    pub processed: bool,
}

/// Per-server batch state.
#[derive(Clone, Debug, Default)]
pub struct BatchEngine {
    batches: Vec<Batch>,
}

impl BatchEngine {
    pub fn new() -> Self {
        BatchEngine::default()
    }

    /// Number of open batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Iterate open batches (snapshot support).
    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.batches.iter()
    }

    /// Drop all batches (connection closed).
    pub fn clear(&mut self) {
        self.batches.clear();
    }

    pub fn find(&self, reference: &str) -> Option<&Batch> {
        self.batches.iter().find(|b| b.reference == reference)
    }

    /// Open a batch from a `BATCH +ref TYPE [params...]` message.
    /// `parent_ref` comes from the opening message's own `batch` tag.
    pub fn open(
        &mut self,
        reference: &str,
        parent_ref: Option<&str>,
        batch_type: &str,
        parameters: &[String],
        tags: &[Tag],
        now: DateTime<Utc>,
    ) {
        if self.find(reference).is_some() {
            debug!(reference, "duplicate batch open ignored");
            return;
        }
        self.batches.push(Batch {
            reference: reference.to_string(),
            parent_ref: parent_ref.map(str::to_string),
            batch_type: batch_type.to_string(),
            parameters: parameters.to_vec(),
            tags: tags.to_vec(),
            start_time: now,
            messages: Vec::new(),
            end_received: false,
            processed: false,
        });
    }

    /// Hold a raw line that carries `batch=reference`.
    /// Returns false when the reference is unknown (line should be
    /// dispatched normally).
    pub fn add_message(&mut self, reference: &str, raw: &str) -> bool {
        match self.batches.iter_mut().find(|b| b.reference == reference) {
            Some(batch) => {
                batch.messages.push(raw.to_string());
                true
            }
            None => false,
        }
    }

    /// Close a batch (`BATCH -ref`) and return the messages to replay,
    /// in order. Processes every closed batch whose parent (if any) is
    /// already processed, looping until a fixpoint, then drops the
    /// processed batches.
    pub fn close(&mut self, reference: &str) -> Vec<Message> {
        let Some(batch) = self.batches.iter_mut().find(|b| b.reference == reference) else {
            return Vec::new();
        };
        batch.end_received = true;

        let mut replay = Vec::new();
        loop {
            let mut processed_any = false;
            for i in 0..self.batches.len() {
                if !self.batches[i].end_received || self.batches[i].processed {
                    continue;
                }
                let parent_done = match &self.batches[i].parent_ref {
                    Some(parent) => self
                        .batches
                        .iter()
                        .find(|b| &b.reference == parent)
                        .map(|b| b.processed)
                        .unwrap_or(true),
                    None => true,
                };
                if parent_done {
                    let batch = self.batches[i].clone();
                    replay.extend(process_batch(&batch));
                    self.batches[i].processed = true;
                    processed_any = true;
                }
            }
            if !processed_any {
                break;
            }
        }

        self.batches.retain(|b| !b.processed);
        replay
    }

    /// Collect batches whose end never arrived. Returns how many were
    /// dropped.
    pub fn purge_stale(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.batches.len();
        self.batches
            .retain(|b| now - b.start_time < Duration::seconds(BATCH_MAX_AGE_SECS));
        before - self.batches.len()
    }
}

/// Replay one processed batch: parse each held line, merge in the
/// batch tags, and collapse `draft/multiline` fragments.
fn process_batch(batch: &Batch) -> Vec<Message> {
    let mut parsed: Vec<Message> = Vec::new();
    for raw in &batch.messages {
        match Message::parse(raw) {
            Ok(msg) => parsed.push(msg),
            Err(err) => debug!(%err, %raw, "dropping unparsable batched line"),
        }
    }

    if batch.batch_type == "draft/multiline" {
        if let Some(target) = batch.parameters.first() {
            return process_multiline(batch, parsed, target);
        }
    }

    parsed
        .into_iter()
        .map(|msg| merge_tags(msg, &batch.tags))
        .collect()
}

/// Re-inject the batch's own tags into a replayed message, dropping
/// the `batch` tag on both sides.
fn merge_tags(mut msg: Message, batch_tags: &[Tag]) -> Message {
    msg.tags.retain(|t| t.key != "batch");
    for tag in batch_tags {
        if tag.key != "batch" && !msg.tags.iter().any(|t| t.key == tag.key) {
            msg.tags.push(tag.clone());
        }
    }
    msg
}

/// Concatenate consecutive PRIVMSG/NOTICE fragments to `target` into a
/// single logical message. Fragments join with `\n` unless tagged
/// `draft/multiline-concat`. Lines not matching the target replay
/// unchanged, before the synthesized message.
fn process_multiline(batch: &Batch, parsed: Vec<Message>, target: &str) -> Vec<Message> {
    let mut replay = Vec::new();
    let mut text = String::new();
    let mut head: Option<Message> = None;

    for msg in parsed {
        let is_fragment = matches!(msg.command_upper().as_str(), "PRIVMSG" | "NOTICE")
            && msg.prefix.is_some()
            && msg.param(0) == Some(target);
        if !is_fragment {
            replay.push(merge_tags(msg, &batch.tags));
            continue;
        }

        let fragment_text = msg.param(1).unwrap_or("").to_string();
        if head.is_none() {
            head = Some(msg);
            text = fragment_text;
        } else {
            if !msg.has_tag("draft/multiline-concat") {
                text.push('\n');
            }
            text.push_str(&fragment_text);
        }
    }

    if let Some(mut head) = head {
        head.tags.retain(|t| t.key != "draft/multiline-concat");
        head.params = vec![target.to_string(), text];
        replay.push(merge_tags(head, &batch.tags));
    }
    replay
}

/// Generate a reference for an outbound batch.
pub fn generate_batch_ref() -> String {
    let mut bytes = [0u8; 6];
    if getrandom::getrandom(&mut bytes).is_err() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        return format!("{:x}", now.as_nanos() & 0xffff_ffff);
    }
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
