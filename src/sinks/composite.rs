use super::Sink;
use crate::error::{LogweaveError, Result};
use crate::formatter::{FormatContext, MessageFormatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Fans each line out to several children.
///
/// Every child is attempted; one that fails or panics is reported and does not
/// keep the rest from receiving the line.
pub struct CompositeSink {
    children: Vec<Box<dyn Sink>>,
}

impl CompositeSink {
    pub fn new(children: Vec<Box<dyn Sink>>) -> Self {
        Self { children }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn each(&self, operation: &str, mut call: impl FnMut(&dyn Sink) -> Result<()>) -> Result<()> {
        let mut failures = 0;
        for child in &self.children {
            match catch_unwind(AssertUnwindSafe(|| call(child.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!("{} sink {} failed: {}", child.kind(), operation, e);
                }
                Err(_) => {
                    failures += 1;
                    warn!("{} sink panicked during {}", child.kind(), operation);
                }
            }
        }

        if failures > 0 {
            return Err(LogweaveError::Sink(format!(
                "{} of {} children failed to {}",
                failures,
                self.children.len(),
                operation
            )));
        }
        Ok(())
    }
}

impl Sink for CompositeSink {
    fn kind(&self) -> &'static str {
        "composite"
    }

    fn write(&self, severity: &str, message: &str) -> Result<()> {
        self.each("write", |child| child.write(severity, message))
    }

    fn write_event(&self, severity: &str, message: &str, context: &FormatContext) -> Result<()> {
        self.each("write", |child| child.write_event(severity, message, context))
    }

    fn close(&self) -> Result<()> {
        self.each("close", |child| child.close())
    }
}

/// Re-renders the event with its own template before writing.
pub struct TemplatedSink {
    formatter: MessageFormatter,
    inner: Box<dyn Sink>,
}

impl TemplatedSink {
    pub fn new(format: &str, inner: Box<dyn Sink>) -> Self {
        Self {
            formatter: MessageFormatter::new(Some(format)),
            inner,
        }
    }
}

impl Sink for TemplatedSink {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn write(&self, severity: &str, message: &str) -> Result<()> {
        self.inner.write(severity, message)
    }

    fn write_event(&self, severity: &str, _message: &str, context: &FormatContext) -> Result<()> {
        let rendered = self.formatter.format(context);
        self.inner.write(severity, &rendered)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recording {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl Sink for Recording {
        fn kind(&self) -> &'static str {
            "recording"
        }

        fn write(&self, _severity: &str, message: &str) -> Result<()> {
            self.lines.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct Failing;

    impl Sink for Failing {
        fn kind(&self) -> &'static str {
            "failing"
        }

        fn write(&self, _severity: &str, _message: &str) -> Result<()> {
            Err(LogweaveError::Sink("disk full".to_string()))
        }
    }

    struct Panicking;

    impl Sink for Panicking {
        fn kind(&self) -> &'static str {
            "panicking"
        }

        fn write(&self, _severity: &str, _message: &str) -> Result<()> {
            panic!("sink exploded");
        }
    }

    #[test]
    fn test_failing_child_does_not_block_siblings() {
        let first = Recording::default();
        let last = Recording::default();
        let (first_lines, last_lines) = (first.lines.clone(), last.lines.clone());

        let composite = CompositeSink::new(vec![
            Box::new(first),
            Box::new(Failing),
            Box::new(Panicking),
            Box::new(last),
        ]);
        let result = composite.write("INFO", "hello");

        assert!(result.is_err());
        assert_eq!(*first_lines.lock().unwrap(), vec!["hello"]);
        assert_eq!(*last_lines.lock().unwrap(), vec!["hello"]);
    }

    #[test]
    fn test_templated_child_renders_own_format() {
        let plain = Recording::default();
        let templated = Recording::default();
        let (plain_lines, templated_lines) = (plain.lines.clone(), templated.lines.clone());

        let composite = CompositeSink::new(vec![
            Box::new(plain),
            Box::new(TemplatedSink::new("{{class}}#{{method}}", Box::new(templated))),
        ]);
        let context = FormatContext::new("Svc", "run");
        composite.write_event("INFO", "default line", &context).unwrap();

        assert_eq!(*plain_lines.lock().unwrap(), vec!["default line"]);
        assert_eq!(*templated_lines.lock().unwrap(), vec!["Svc#run"]);
    }
}
