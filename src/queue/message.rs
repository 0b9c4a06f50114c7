/// One message returned by a queue receive call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    id: Option<String>,
    body: String,
    ack_token: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: None,
            body: body.into(),
            ack_token: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_ack_token(mut self, token: impl Into<String>) -> Self {
        self.ack_token = Some(token.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Opaque handle the queue requires to delete this message.
    pub fn ack_token(&self) -> Option<&str> {
        self.ack_token.as_deref()
    }

    pub fn into_body(self) -> String {
        self.body
    }
}

/// Messages returned by a single receive call. An empty batch is a normal
/// result of a long poll that found nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    messages: Vec<Message>,
}

impl Batch {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl From<Vec<Message>> for Batch {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

impl From<Option<Vec<Message>>> for Batch {
    fn from(messages: Option<Vec<Message>>) -> Self {
        Self::new(messages.unwrap_or_default())
    }
}

impl IntoIterator for Batch {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
