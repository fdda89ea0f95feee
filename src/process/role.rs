use crate::context::{ApplicationContext, ParentHandle};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Worker main loop, invoked inside the freshly created process.
///
/// Under normal operation it returns only when the worker has been asked to
/// terminate; the process exits right after.
pub type EntryPoint = Arc<dyn Fn(&ParentHandle, &ApplicationContext) -> Result<()> + Send + Sync>;

/// Category of a worker role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Stream,
    Message,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 2] = [WorkerKind::Stream, WorkerKind::Message];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Stream => "stream",
            WorkerKind::Message => "message",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        WorkerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = WorkerKind::ALL.iter().map(WorkerKind::as_str).collect();
                format!("Unknown worker kind: '{}'. Valid options: {}", s, valid.join(", "))
            })
    }
}

/// Immutable descriptor of one worker role
#[derive(Clone)]
pub struct WorkerRole {
    name: String,
    kind: WorkerKind,
    entry_point: EntryPoint,
}

impl WorkerRole {
    pub fn new<F>(name: impl Into<String>, kind: WorkerKind, entry_point: F) -> Self
    where
        F: Fn(&ParentHandle, &ApplicationContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            entry_point: Arc::new(entry_point),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Run the worker main loop in the current process
    pub fn run(&self, parent: &ParentHandle, context: &ApplicationContext) -> Result<()> {
        (self.entry_point)(parent, context)
    }
}

impl fmt::Debug for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRole")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_kind_display() {
        assert_eq!(WorkerKind::Stream.to_string(), "stream");
        assert_eq!(WorkerKind::Message.to_string(), "message");
    }

    #[test]
    fn test_kind_parses_its_own_name() {
        for kind in WorkerKind::ALL {
            assert_eq!(kind.as_str().parse::<WorkerKind>(), Ok(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("Stream".parse::<WorkerKind>().is_err());
        assert!("".parse::<WorkerKind>().is_err());
    }

    #[test]
    fn test_run_invokes_entry_point() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let role = WorkerRole::new("stream", WorkerKind::Stream, move |parent, context| {
            assert_eq!(parent.role(), "stream");
            assert_eq!(context.name(), "warden");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let context = ApplicationContext::default();
        let parent = ParentHandle::new(1, "stream", WorkerKind::Stream);
        role.run(&parent, &context).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(role.name(), "stream");
        assert_eq!(role.kind(), WorkerKind::Stream);
    }
}
