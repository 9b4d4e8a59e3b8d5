use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const CHANNEL_CAPACITY: usize = 100;

/// Finite, single-pass sequence of text chunks produced by a generation task.
///
/// Dropping the stream (or calling [`TextStream::cancel`]) closes the channel; the producer
/// observes the closed channel on its next send and stops.
#[derive(Debug)]
pub struct TextStream {
    rx: mpsc::Receiver<String>,
}

impl TextStream {
    /// Producer/consumer pair. The producer side is handed to the generation task.
    pub fn channel() -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (tx, Self { rx })
    }

    /// A stream that yields `text` once (nothing if empty).
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let (tx, stream) = Self::channel();
        if !text.is_empty() {
            // Fresh channel with spare capacity: try_send cannot fail here.
            let _ = tx.try_send(text);
        }
        stream
    }

    /// Next chunk, or `None` once the producer is done.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Buffers every remaining chunk.
    pub async fn collect(mut self) -> String {
        let mut out = String::new();
        while let Some(chunk) = self.rx.recv().await {
            out.push_str(&chunk);
        }
        out
    }

    /// Stops the producer; chunks already buffered are discarded.
    pub fn cancel(mut self) {
        self.rx.close();
    }

    /// Forward incrementally (e.g. as an HTTP body).
    pub fn into_stream(self) -> ReceiverStream<String> {
        ReceiverStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_text_yields_once() {
        let mut stream = TextStream::from_text("hello");
        assert_eq!(stream.next().await.as_deref(), Some("hello"));
        assert_eq!(stream.next().await, None);
        assert_eq!(TextStream::from_text("").collect().await, "");
    }

    #[tokio::test]
    async fn collect_joins_chunks_in_order() {
        let (tx, stream) = TextStream::channel();
        tokio::spawn(async move {
            for word in ["The ", "answer ", "is ", "42"] {
                if tx.send(word.to_string()).await.is_err() {
                    break;
                }
            }
        });
        assert_eq!(stream.collect().await, "The answer is 42");
    }

    #[tokio::test]
    async fn cancel_stops_producer() {
        let (tx, stream) = TextStream::channel();
        stream.cancel();
        assert!(tx.send("late".into()).await.is_err());
    }
}
