//! Source buffer: the three editable fragments and change notification.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The three source texts composing a playground project.
///
/// All fields are always present; a missing fragment is the empty string,
/// never an absent value. The buffer hands out clones, so the editing
/// surface and the preview pipeline never share a mutable reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(default)]
    pub markup: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub script: String,
}

/// Selects one fragment of a [`SourceDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fragment {
    Markup,
    Style,
    Script,
}

/// Holds the current [`SourceDocument`] and which fragment is being edited.
///
/// Fragment content is accepted as-is: syntactically invalid markup or
/// script is stored without complaint and fails later, at execution time.
/// Every mutation synchronously notifies all subscribers with a by-value
/// snapshot of the whole document.
pub struct SourceBuffer {
    doc: SourceDocument,
    active: Fragment,
    subscribers: Vec<mpsc::UnboundedSender<SourceDocument>>,
}

impl SourceBuffer {
    pub fn new(doc: SourceDocument) -> Self {
        Self {
            doc,
            active: Fragment::Markup,
            subscribers: Vec::new(),
        }
    }

    /// Replace one fragment wholesale and notify subscribers.
    ///
    /// Returns a snapshot of the document after the edit.
    pub fn set_fragment(&mut self, fragment: Fragment, text: impl Into<String>) -> SourceDocument {
        let text = text.into();
        match fragment {
            Fragment::Markup => self.doc.markup = text,
            Fragment::Style => self.doc.style = text,
            Fragment::Script => self.doc.script = text,
        }
        self.active = fragment;
        let snapshot = self.doc.clone();
        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        snapshot
    }

    /// Swap in a whole new document (e.g. an opened project) with a single
    /// subscriber notification.
    pub fn replace(&mut self, doc: SourceDocument) -> SourceDocument {
        self.doc = doc;
        let snapshot = self.doc.clone();
        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        snapshot
    }

    /// Current document snapshot.
    pub fn document(&self) -> SourceDocument {
        self.doc.clone()
    }

    /// The fragment most recently edited.
    pub fn active_fragment(&self) -> Fragment {
        self.active
    }

    /// Register a change subscriber. The send happens synchronously inside
    /// [`set_fragment`](Self::set_fragment); delivery to the receiving task
    /// is asynchronous.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SourceDocument> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }
}

impl Default for SourceBuffer {
    fn default() -> Self {
        Self::new(SourceDocument::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_round_trip() {
        let mut buffer = SourceBuffer::default();
        for text in [
            "",
            "console.log('x')",
            "</script><script>alert(1)</script>",
            "var s = \"</script>\";",
            "<p>not script</p>",
        ] {
            buffer.set_fragment(Fragment::Script, text);
            assert_eq!(buffer.document().script, text);
        }
    }

    #[test]
    fn test_defaults_are_empty_strings() {
        let doc = SourceDocument::default();
        assert_eq!(doc.markup, "");
        assert_eq!(doc.style, "");
        assert_eq!(doc.script, "");

        let doc: SourceDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(doc, SourceDocument::default());
    }

    #[test]
    fn test_set_fragment_notifies_subscribers() {
        let mut buffer = SourceBuffer::default();
        let mut rx = buffer.subscribe();

        buffer.set_fragment(Fragment::Markup, "<p>hi</p>");
        buffer.set_fragment(Fragment::Style, "p { color: red; }");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.markup, "<p>hi</p>");
        assert_eq!(first.style, "");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.markup, "<p>hi</p>");
        assert_eq!(second.style, "p { color: red; }");

        assert!(rx.try_recv().is_err());
        assert_eq!(buffer.active_fragment(), Fragment::Style);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut buffer = SourceBuffer::default();
        let rx = buffer.subscribe();
        drop(rx);
        // Must not fail or grow; the dead sender is removed on next notify.
        buffer.set_fragment(Fragment::Script, "1 + 1");
        assert_eq!(buffer.document().script, "1 + 1");
    }

    #[test]
    fn test_replace_swaps_document_with_one_notification() {
        let mut buffer = SourceBuffer::default();
        let mut rx = buffer.subscribe();
        buffer.replace(SourceDocument {
            markup: "<p>opened</p>".into(),
            style: "p {}".into(),
            script: "go()".into(),
        });
        let seen = rx.try_recv().unwrap();
        assert_eq!(seen.markup, "<p>opened</p>");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut buffer = SourceBuffer::default();
        let snapshot = buffer.set_fragment(Fragment::Script, "a");
        buffer.set_fragment(Fragment::Script, "b");
        assert_eq!(snapshot.script, "a");
        assert_eq!(buffer.document().script, "b");
    }
}
