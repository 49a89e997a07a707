use super::Error;
use crate::submission::{Signal, Submission};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};

/// Message types that can be sent to the [Mailbox].
pub enum Message {
    /// Buffer the signals computed from a submission.
    Submit {
        submission: Submission,
        signals: Vec<Signal>,
        responder: oneshot::Sender<Result<usize, Error>>,
    },

    /// Flush all buffered records.
    Flush {
        responder: oneshot::Sender<Result<(), Error>>,
    },

    /// Flush all buffered records and stop accepting requests.
    Close {
        responder: oneshot::Sender<Result<(), Error>>,
    },
}

/// Ingress mailbox for the [super::Actor].
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Buffer a record for every signal computed from `submission`.
    ///
    /// Returns the number of records buffered once the actor has processed the request.
    pub async fn submit(
        &mut self,
        submission: Submission,
        signals: Vec<Signal>,
    ) -> Result<usize, Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Submit {
                submission,
                signals,
                responder,
            })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)?
    }

    /// Flush all buffered records.
    pub async fn flush(&mut self) -> Result<(), Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Flush { responder })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)?
    }

    /// Drain all buffered records and stop the actor.
    ///
    /// Requests sent by other mailboxes after this one is processed fail with [Error::Closed].
    pub async fn close(&mut self) -> Result<(), Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Close { responder })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)?
    }
}
