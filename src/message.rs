use std::fmt;

/// Opaque payload carried by one request or one reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Message(Vec<u8>);

impl Message {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Message(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message(bytes)
    }
}

impl From<&[u8]> for Message {
    fn from(bytes: &[u8]) -> Self {
        Message(bytes.to_vec())
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message(text.as_bytes().to_vec())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message(text.into_bytes())
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

#[test]
fn test_message_views() {
    let msg = Message::from("Hello-3");
    assert_eq!(msg.as_bytes(), b"Hello-3");
    assert_eq!(msg.as_str(), Some("Hello-3"));
    assert_eq!(msg.len(), 7);

    let binary = Message::new(vec![0xff, 0x00, 0x41]);
    assert_eq!(binary.as_str(), None);
    assert_eq!(binary.to_string(), "\u{fffd}\u{0}A");
    assert!(Message::default().is_empty());
}
