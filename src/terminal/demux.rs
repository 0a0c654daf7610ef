//! Routes the shared host event feed to sessions
//!
//! The host knows nothing about sessions, so every streaming process is bound
//! here to the session that started it. Each bound process gets its own
//! [`AnsiTranslator`] so style state and split escape sequences carry across
//! chunks.

use crate::ansi::{AnsiTranslator, StyledSpan};
use crate::core::sessions::{LogOrigin, SessionId};
use crate::host::{ChunkSource, HostEvent, ProcessId, ProcessKind, ProcessStatus};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::trace;

struct Binding {
    session_id: SessionId,
    kind: ProcessKind,
    translator: AnsiTranslator,
}

/// What a host event means for the session layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Started {
        session_id: SessionId,
        process_id: ProcessId,
        kind: ProcessKind,
    },
    Output {
        session_id: SessionId,
        origin: LogOrigin,
        spans: Vec<StyledSpan>,
    },
    Ended {
        session_id: SessionId,
        process_id: ProcessId,
        exit_code: Option<i32>,
        status: ProcessStatus,
    },
}

#[derive(Default)]
pub struct OutputDemux {
    bindings: HashMap<ProcessId, Binding>,
}

impl OutputDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a process to a session. Binding an already bound process again
    /// keeps its translator state.
    pub fn bind(&mut self, process_id: ProcessId, session_id: SessionId, kind: ProcessKind) {
        self.bindings
            .entry(process_id)
            .and_modify(|b| {
                b.session_id = session_id;
                b.kind = kind;
            })
            .or_insert_with(|| Binding {
                session_id,
                kind,
                translator: AnsiTranslator::new(),
            });
    }

    /// Forget a process; its later events are dropped
    pub fn unbind(&mut self, process_id: ProcessId) -> Option<SessionId> {
        self.bindings.remove(&process_id).map(|b| b.session_id)
    }

    /// Forget every process bound to a session
    pub fn unbind_session(&mut self, session_id: SessionId) -> Vec<ProcessId> {
        let ids: Vec<ProcessId> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.session_id == session_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.bindings.remove(id);
        }
        ids
    }

    pub fn session_for(&self, process_id: ProcessId) -> Option<SessionId> {
        self.bindings.get(&process_id).map(|b| b.session_id)
    }

    pub fn is_bound(&self, process_id: ProcessId) -> bool {
        self.bindings.contains_key(&process_id)
    }

    /// Translate a host event. Events for unbound processes return `None`.
    /// `Ended` removes the binding.
    pub fn route(&mut self, event: HostEvent) -> Option<Routed> {
        match event {
            HostEvent::Started {
                process_id, kind, ..
            } => {
                let Some(binding) = self.bindings.get_mut(&process_id) else {
                    trace!("Dropping Started for unbound {}", process_id);
                    return None;
                };
                binding.kind = kind;
                Some(Routed::Started {
                    session_id: binding.session_id,
                    process_id,
                    kind,
                })
            }
            HostEvent::Output { process_id, chunk } => {
                let Some(binding) = self.bindings.get_mut(&process_id) else {
                    trace!("Dropping {} bytes for unbound {}", chunk.text.len(), process_id);
                    return None;
                };
                let origin = match chunk.source {
                    ChunkSource::Stdout => LogOrigin::Stdout,
                    ChunkSource::Stderr => LogOrigin::Stderr,
                };
                let spans = if binding.kind == ProcessKind::Interactive {
                    let text = binding.translator.feed_clean(chunk.text.as_bytes());
                    if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![StyledSpan::plain(text)]
                    }
                } else {
                    binding.translator.feed(chunk.text.as_bytes())
                };
                if spans.is_empty() {
                    return None;
                }
                Some(Routed::Output {
                    session_id: binding.session_id,
                    origin,
                    spans,
                })
            }
            HostEvent::Ended {
                process_id,
                exit_code,
                status,
            } => {
                let Some(binding) = self.bindings.remove(&process_id) else {
                    trace!("Dropping Ended for unbound {}", process_id);
                    return None;
                };
                Some(Routed::Ended {
                    session_id: binding.session_id,
                    process_id,
                    exit_code,
                    status,
                })
            }
        }
    }
}

/// Coalesces redraw requests to at most one per window
pub struct RedrawBatcher {
    interval: Duration,
    pending: BTreeSet<SessionId>,
    last_flush: Option<Instant>,
}

impl RedrawBatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: BTreeSet::new(),
            last_flush: None,
        }
    }

    pub fn mark<I: IntoIterator<Item = SessionId>>(&mut self, sessions: I) {
        self.pending.extend(sessions);
    }

    pub fn forget(&mut self, session_id: SessionId) {
        self.pending.remove(&session_id);
    }

    /// Pending sessions, if the window since the last flush has elapsed
    pub fn flush(&mut self, now: Instant) -> Option<Vec<SessionId>> {
        if self.pending.is_empty() {
            return None;
        }
        if let Some(last) = self.last_flush {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_flush = Some(now);
        Some(std::mem::take(&mut self.pending).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ansi::{AnsiColor, SpanStyle};
    use crate::host::OutputChunk;
    use chrono::Utc;

    fn output(process_id: ProcessId, seq: u64, text: &str) -> HostEvent {
        HostEvent::Output {
            process_id,
            chunk: OutputChunk {
                seq,
                text: text.to_string(),
                source: ChunkSource::Stdout,
                timestamp: Utc::now(),
            },
        }
    }

    #[test]
    fn test_unknown_process_output_dropped() {
        let mut demux = OutputDemux::new();
        assert_eq!(demux.route(output(ProcessId::generate(), 0, "hello")), None);
    }

    #[test]
    fn test_styled_output_keeps_state_across_chunks() {
        let mut demux = OutputDemux::new();
        let id = ProcessId::generate();
        demux.bind(id, 1, ProcessKind::LongRunning);

        assert_eq!(demux.route(output(id, 0, "\x1b[31")), None);
        let routed = demux.route(output(id, 1, "mready")).unwrap();
        assert_eq!(
            routed,
            Routed::Output {
                session_id: 1,
                origin: LogOrigin::Stdout,
                spans: vec![StyledSpan::styled("ready", SpanStyle::default().fg(AnsiColor::Red))],
            }
        );
    }

    #[test]
    fn test_interactive_output_is_clean() {
        let mut demux = OutputDemux::new();
        let id = ProcessId::generate();
        demux.bind(id, 2, ProcessKind::Interactive);

        let routed = demux.route(output(id, 0, "\x1b[1m4\x1b[0m\r\n>>> ")).unwrap();
        let Routed::Output { spans, .. } = routed else {
            panic!("expected output");
        };
        assert_eq!(spans, vec![StyledSpan::plain("4\n>>> ")]);
    }

    #[test]
    fn test_started_sets_translation_mode() {
        let mut demux = OutputDemux::new();
        let id = ProcessId::generate();
        // Bound at dispatch, before the kind is known
        demux.bind(id, 1, ProcessKind::OneShot);

        let started = HostEvent::Started {
            process_id: id,
            command: "python3".to_string(),
            kind: ProcessKind::Interactive,
        };
        assert_eq!(
            demux.route(started),
            Some(Routed::Started {
                session_id: 1,
                process_id: id,
                kind: ProcessKind::Interactive,
            })
        );
        let Some(Routed::Output { spans, .. }) = demux.route(output(id, 0, "\x1b[32m4\x1b[0m\r\n")) else {
            panic!("expected output");
        };
        assert_eq!(spans, vec![StyledSpan::plain("4\n")]);
    }

    #[test]
    fn test_rebind_is_idempotent() {
        let mut demux = OutputDemux::new();
        let id = ProcessId::generate();
        demux.bind(id, 1, ProcessKind::LongRunning);
        demux.route(output(id, 0, "\x1b[32m"));
        demux.bind(id, 1, ProcessKind::LongRunning);

        let Some(Routed::Output { spans, .. }) = demux.route(output(id, 1, "ok")) else {
            panic!("expected output");
        };
        assert_eq!(spans[0].style.fg, Some(AnsiColor::Green));
    }

    #[test]
    fn test_ended_unbinds() {
        let mut demux = OutputDemux::new();
        let id = ProcessId::generate();
        demux.bind(id, 3, ProcessKind::LongRunning);

        let ended = HostEvent::Ended {
            process_id: id,
            exit_code: Some(0),
            status: ProcessStatus::Exited,
        };
        assert!(matches!(demux.route(ended.clone()), Some(Routed::Ended { session_id: 3, .. })));
        assert!(!demux.is_bound(id));
        assert_eq!(demux.route(ended), None);
        assert_eq!(demux.route(output(id, 5, "late")), None);
    }

    #[test]
    fn test_unbind_session() {
        let mut demux = OutputDemux::new();
        let a = ProcessId::generate();
        let b = ProcessId::generate();
        demux.bind(a, 1, ProcessKind::LongRunning);
        demux.bind(b, 2, ProcessKind::Interactive);

        assert_eq!(demux.unbind_session(1), vec![a]);
        assert_eq!(demux.session_for(b), Some(2));
    }

    #[test]
    fn test_redraw_batching() {
        let mut batcher = RedrawBatcher::new(Duration::from_millis(16));
        let start = Instant::now();
        assert_eq!(batcher.flush(start), None);

        batcher.mark([2, 1, 2]);
        assert_eq!(batcher.flush(start), Some(vec![1, 2]));

        batcher.mark([3]);
        assert_eq!(batcher.flush(start + Duration::from_millis(5)), None);
        batcher.mark([1]);
        assert_eq!(batcher.flush(start + Duration::from_millis(20)), Some(vec![1, 3]));
    }
}
