use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::http::HttpRequest;
use crate::protocol::Inbound;

/// Worker events
#[derive(Debug)]
pub enum Event {
  /// Intercepted request from the host page
  Fetch { id: u64, request: HttpRequest },
  /// Background-sync registration fired
  Sync(String),
  /// Connectivity restored
  Online,
  /// Connectivity lost
  Offline,
  /// Host asked for status
  Status,
  /// Line that could not be parsed
  Invalid(String),
  /// Host went away (stdin closed or interrupt)
  Shutdown,
}

impl From<Inbound> for Event {
  fn from(msg: Inbound) -> Self {
    match msg {
      Inbound::Fetch {
        id,
        method,
        url,
        headers,
        body,
      } => Event::Fetch {
        id,
        request: HttpRequest {
          method,
          url,
          headers,
          body,
        },
      },
      Inbound::Sync { tag } => Event::Sync(tag),
      Inbound::Online => Event::Online,
      Inbound::Offline => Event::Offline,
      Inbound::Status => Event::Status,
    }
  }
}

/// Event handler that merges host messages, sync registrations and
/// connectivity probes into one stream processed one event at a time.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Read host messages from stdin and stop on Ctrl-C.
  pub fn new() -> Self {
    let handler = Self::from_reader(tokio::io::stdin());

    let tx = handler.sender();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });

    handler
  }

  /// Read host messages, one JSON object per line, from `reader`.
  pub fn from_reader<R>(reader: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    let lines_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        let event = match lines.next_line().await {
          Ok(Some(line)) if line.trim().is_empty() => continue,
          Ok(Some(line)) => match Inbound::parse(&line) {
            Ok(msg) => Event::from(msg),
            Err(e) => Event::Invalid(e.to_string()),
          },
          Ok(None) | Err(_) => Event::Shutdown,
        };

        let done = matches!(event, Event::Shutdown);
        if lines_tx.send(event).is_err() || done {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Sender for tasks that feed events into the loop.
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
