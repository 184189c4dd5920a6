use std::time::Instant;

use recsync_protocol::{ByteRange, TransferProgress, TransferState};

/// A chunk of file data at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

impl Chunk {
    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.end())
    }
}

/// State of one resumable transfer, owned by the call that drives it.
#[derive(Debug)]
pub struct TransferSession {
    session_id: String,
    remote_upload_url: Option<String>,
    total_bytes: u64,
    bytes_transferred: u64,
    chunk_size: u64,
    state: TransferState,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    error: Option<String>,
}

impl TransferSession {
    /// Creates a new pending session.
    pub fn new(total_bytes: u64, chunk_size: u64) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            remote_upload_url: None,
            total_bytes,
            bytes_transferred: 0,
            chunk_size,
            state: TransferState::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Marks the session active. Binds the remote session URL for uploads.
    pub fn start(&mut self, remote_upload_url: Option<String>) {
        self.remote_upload_url = remote_upload_url;
        self.state = TransferState::Active;
        self.started_at = Some(Instant::now());
    }

    /// Moves the committed offset to `offset`, clamped to `total_bytes`.
    ///
    /// The offset may move backwards when the server reports it kept less
    /// than was sent.
    pub fn set_transferred(&mut self, offset: u64) {
        self.bytes_transferred = offset.min(self.total_bytes);
    }

    /// Backing off between attempts.
    pub fn pause(&mut self) {
        if self.state == TransferState::Active {
            self.state = TransferState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == TransferState::Paused {
            self.state = TransferState::Active;
        }
    }

    pub fn complete(&mut self) {
        self.bytes_transferred = self.total_bytes;
        self.finish(TransferState::Completed);
    }

    pub fn fail(&mut self, err: &str) {
        self.error = Some(err.to_string());
        self.finish(TransferState::Failed);
    }

    pub fn cancel(&mut self) {
        self.finish(TransferState::Cancelled);
    }

    fn finish(&mut self, state: TransferState) {
        if !self.state.is_terminal() {
            self.state = state;
            self.completed_at = Some(Instant::now());
        }
    }

    /// Next range to send or fetch, `None` once everything is committed.
    pub fn next_range(&self) -> Option<ByteRange> {
        if self.bytes_transferred >= self.total_bytes {
            return None;
        }
        let end = (self.bytes_transferred + self.chunk_size).min(self.total_bytes);
        Some(ByteRange::new(self.bytes_transferred, end))
    }

    pub fn progress(&self, bytes_per_second: f64) -> TransferProgress {
        TransferProgress::new(self.bytes_transferred, self.total_bytes).with_speed(bytes_per_second)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn remote_upload_url(&self) -> Option<&str> {
        self.remote_upload_url.as_deref()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Wall time since `start`, until the terminal transition.
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Instant::now) - started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_pending() {
        let session = TransferSession::new(1000, 256);
        assert_eq!(session.state(), TransferState::Pending);
        assert_eq!(session.bytes_transferred(), 0);
        assert!(!session.session_id().is_empty());
    }

    #[test]
    fn ranges_tile_with_final_short_chunk() {
        let mut session = TransferSession::new(1000, 256);
        session.start(Some("https://upload/1".into()));
        let mut ranges = Vec::new();
        while let Some(r) = session.next_range() {
            ranges.push((r.start, r.end));
            session.set_transferred(r.end);
        }
        assert_eq!(ranges, vec![(0, 256), (256, 512), (512, 768), (768, 1000)]);
        assert_eq!(session.remote_upload_url(), Some("https://upload/1"));
    }

    #[test]
    fn transferred_never_exceeds_total() {
        let mut session = TransferSession::new(100, 64);
        session.set_transferred(5000);
        assert_eq!(session.bytes_transferred(), 100);
        assert!(session.next_range().is_none());
    }

    #[test]
    fn transferred_may_move_backwards() {
        let mut session = TransferSession::new(100, 64);
        session.set_transferred(64);
        session.set_transferred(10);
        assert_eq!(session.next_range(), Some(ByteRange::new(10, 74)));
    }

    #[test]
    fn pause_and_resume_only_from_active() {
        let mut session = TransferSession::new(10, 4);
        session.pause();
        assert_eq!(session.state(), TransferState::Pending);
        session.start(None);
        session.pause();
        assert_eq!(session.state(), TransferState::Paused);
        session.resume();
        assert_eq!(session.state(), TransferState::Active);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut session = TransferSession::new(10, 4);
        session.start(None);
        session.fail("disk full");
        session.cancel();
        assert_eq!(session.state(), TransferState::Failed);
        assert_eq!(session.error(), Some("disk full"));
    }

    #[test]
    fn complete_fills_progress() {
        let mut session = TransferSession::new(10, 4);
        session.start(None);
        session.complete();
        let p = session.progress(0.0);
        assert_eq!(p.bytes_transferred, 10);
        assert_eq!(p.percent, Some(100.0));
    }

    #[test]
    fn zero_byte_session_is_indeterminate() {
        let session = TransferSession::new(0, 4);
        assert!(session.progress(0.0).is_indeterminate());
        assert!(session.next_range().is_none());
    }
}
