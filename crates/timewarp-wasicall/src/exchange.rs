//! Request/response reconstruction from independently recorded messages.
//!
//! Protocols that were recorded one message at a time (a request on one
//! call, its response on a later one) share an identifier between the two
//! halves. [`ExchangeReader`] pairs them back up: the first message with a
//! given id is held in flight, the second completes the exchange. Messages
//! still in flight when the input ends become exchanges with an
//! [`Response::Interrupted`] response rather than being dropped.

use std::collections::VecDeque;

use indexmap::IndexMap;
use tracing::{debug, warn};

/// Default number of messages read before pairing.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// One recorded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<T> {
    /// Identifier shared by a request and its response.
    pub id: i64,
    /// Nanoseconds since the process start when the message began.
    pub time: i64,
    /// Nanoseconds the message took to transfer.
    pub span: i64,
    /// Error observed while transferring the message.
    pub error: Option<String>,
    /// Decoded protocol message.
    pub payload: T,
}

/// The first half of an exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request<T> {
    /// Nanoseconds since the process start.
    pub time: i64,
    /// Transfer duration in nanoseconds.
    pub span: i64,
    /// Transfer error, if any.
    pub error: Option<String>,
    /// The request message.
    pub payload: T,
}

/// The second half of an exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response<T> {
    /// The response was recorded.
    Received {
        /// Nanoseconds from the start of the request.
        offset: i64,
        /// Transfer duration in nanoseconds.
        span: i64,
        /// Transfer error, if any.
        error: Option<String>,
        /// The response message.
        payload: T,
    },
    /// The recording ended before a response arrived.
    Interrupted,
}

/// A request paired with its response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exchange<T> {
    /// Identifier shared by both halves.
    pub id: i64,
    /// The request.
    pub request: Request<T>,
    /// The response.
    pub response: Response<T>,
}

impl<T> Exchange<T> {
    /// Nanoseconds since the process start at which the response finished.
    /// An interrupted exchange ends when its request started.
    pub fn end_time(&self) -> i64 {
        match &self.response {
            Response::Received { offset, span, .. } => self
                .request
                .time
                .saturating_add(*offset)
                .saturating_add(*span),
            Response::Interrupted => self.request.time,
        }
    }

    /// Whether the response is missing.
    pub fn is_interrupted(&self) -> bool {
        matches!(self.response, Response::Interrupted)
    }
}

impl<T> Request<T> {
    fn from_message(msg: Message<T>) -> Self {
        Self {
            time: msg.time,
            span: msg.span,
            error: msg.error,
            payload: msg.payload,
        }
    }
}

/// Pairs a stream of messages into exchanges.
///
/// Messages are read in chunks; the exchanges completed by each chunk are
/// emitted in order of their end time. The in-flight table is owned by the
/// reader, so independent readers never share state.
///
/// # Examples
///
/// ```
/// use timewarp_wasicall::exchange::{ExchangeReader, Message};
///
/// let msg = |id, time, payload| Message { id, time, span: 1, error: None, payload };
/// let messages = vec![msg(1, 0, "GET /"), msg(1, 10, "200 OK")];
///
/// let exchanges: Vec<_> = ExchangeReader::new(messages.into_iter()).collect();
/// assert_eq!(exchanges.len(), 1);
/// assert_eq!(exchanges[0].request.payload, "GET /");
/// assert_eq!(exchanges[0].end_time(), 11);
/// ```
pub struct ExchangeReader<I, T> {
    messages: I,
    chunk_size: usize,
    inflight: IndexMap<i64, Message<T>>,
    ready: VecDeque<Exchange<T>>,
    done: bool,
}

impl<I, T> ExchangeReader<I, T>
where
    I: Iterator<Item = Message<T>>,
{
    /// Read exchanges from `messages` with the default chunk size.
    pub fn new(messages: I) -> Self {
        Self::with_chunk_size(messages, DEFAULT_CHUNK_SIZE)
    }

    /// Read exchanges from `messages`, pairing `chunk_size` messages at a
    /// time. A chunk size of zero is treated as one.
    pub fn with_chunk_size(messages: I, chunk_size: usize) -> Self {
        Self {
            messages,
            chunk_size: chunk_size.max(1),
            inflight: IndexMap::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// Messages waiting for their other half.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Pair the next chunk. Returns false once the input is exhausted and
    /// every in-flight message has been flushed.
    fn fill(&mut self) -> bool {
        let mut batch = Vec::new();
        let mut read = 0;
        for msg in self.messages.by_ref().take(self.chunk_size) {
            read += 1;
            match self.inflight.shift_remove(&msg.id) {
                None => {
                    self.inflight.insert(msg.id, msg);
                }
                Some(req) => {
                    let offset = msg.time.saturating_sub(req.time);
                    batch.push(Exchange {
                        id: req.id,
                        request: Request::from_message(req),
                        response: Response::Received {
                            offset,
                            span: msg.span,
                            error: msg.error,
                            payload: msg.payload,
                        },
                    });
                }
            }
        }

        if read == 0 {
            if self.inflight.is_empty() {
                return false;
            }
            warn!(
                exchanges = self.inflight.len(),
                "message stream ended with requests in flight"
            );
            // Drain in insertion order so equal end times stay stable.
            batch.extend(self.inflight.drain(..).map(|(id, req)| Exchange {
                id,
                request: Request::from_message(req),
                response: Response::Interrupted,
            }));
        }

        debug!(
            messages = read,
            exchanges = batch.len(),
            in_flight = self.inflight.len(),
            "paired message chunk"
        );
        batch.sort_by_key(Exchange::end_time);
        self.ready.extend(batch);
        true
    }
}

impl<I, T> Iterator for ExchangeReader<I, T>
where
    I: Iterator<Item = Message<T>>,
{
    type Item = Exchange<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(exchange) = self.ready.pop_front() {
                return Some(exchange);
            }
            if self.done {
                return None;
            }
            if !self.fill() {
                self.done = true;
            }
        }
    }
}
