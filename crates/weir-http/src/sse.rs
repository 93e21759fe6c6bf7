/// A single Server-Sent Events message (§4.5).
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self { data: data.into(), ..Default::default() }
    }

    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    /// Formats as `event:`/`data:`/`id:`/`retry:` lines terminated by a
    /// blank line; multi-line `data` becomes multiple `data:` lines.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(retry) = self.retry {
            out.push_str("retry: ");
            out.push_str(&retry.to_string());
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_single_line_event() {
        let event = SseEvent::data("hello").event("greeting").id("1");
        assert_eq!(event.format(), "event: greeting\ndata: hello\nid: 1\n\n");
    }

    #[test]
    fn multiline_data_becomes_multiple_lines() {
        let event = SseEvent::data("line one\nline two");
        assert_eq!(event.format(), "data: line one\ndata: line two\n\n");
    }
}
