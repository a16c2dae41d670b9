use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use bytes::BytesMut;
use futures::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time,
};
use tokio_util::{
    codec::{Decoder, FramedRead, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};

use crate::predict::Predictor;

/// Longest request line a client may send, newline excluded.
pub const MAX_REQUEST_LEN: usize = 1 << 20;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of client connections.
#[allow(unused)]
#[trait_variant::make(Incoming: Send)]
pub trait IncomingTemplate {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&mut self) -> io::Result<(Self::Conn, SocketAddr)>;
}

impl Incoming for TcpListener {
    type Conn = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

enum RequestLine {
    Text(String),
    /// A line past [`MAX_REQUEST_LEN`], its bytes are dropped up to the newline.
    Oversized,
}

/// [`LinesCodec`] that yields oversized lines as an item instead of ending the stream.
struct RequestLines(LinesCodec);

impl RequestLines {
    fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_REQUEST_LEN))
    }

    fn map(decoded: Result<Option<String>, LinesCodecError>) -> io::Result<Option<RequestLine>> {
        match decoded {
            Ok(line) => Ok(line.map(RequestLine::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(RequestLine::Oversized)),
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for RequestLines {
    type Item = RequestLine;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<RequestLine>> {
        Self::map(self.0.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<RequestLine>> {
        Self::map(self.0.decode_eof(buf))
    }
}

#[derive(Debug, Deserialize)]
struct PredictRequest {
    inputs: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PredictResponse {
    Predictions { predictions: Vec<Vec<f32>> },
    Error { error: String },
}

fn respond(predictor: &Predictor, line: &str) -> PredictResponse {
    let request: PredictRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return PredictResponse::Error {
                error: format!("malformed request: {e}"),
            };
        }
    };

    match predictor.predict(&request.inputs) {
        Ok(predictions) => PredictResponse::Predictions { predictions },
        Err(e) => PredictResponse::Error {
            error: e.to_string(),
        },
    }
}

/// Answers every request line of `stream` until the peer closes it.
///
/// A bad request gets an error line back, the connection stays open. So does
/// a line longer than [`MAX_REQUEST_LEN`], which is skipped up to its newline.
///
/// # Returns
/// The amount of requests answered or the io error that broke the connection.
pub async fn handle_connection<S>(stream: S, predictor: &Predictor) -> anyhow::Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (rx, mut tx) = tokio::io::split(stream);
    let mut lines = FramedRead::new(rx, RequestLines::new());
    let mut answered = 0;

    while let Some(line) = lines.next().await {
        let response = match line.context("cannot read request")? {
            RequestLine::Text(line) if line.trim().is_empty() => continue,
            RequestLine::Text(line) => respond(predictor, line.trim()),
            RequestLine::Oversized => PredictResponse::Error {
                error: format!("request exceeds {MAX_REQUEST_LEN} bytes"),
            },
        };

        let mut response = serde_json::to_vec(&response)?;
        response.push(b'\n');

        tx.write_all(&response).await.context("cannot write response")?;
        tx.flush().await?;
        answered += 1;
    }

    Ok(answered)
}

/// Accepts connections from `incoming` until `cancel` fires, one task per connection.
pub async fn serve<I: Incoming>(
    mut incoming: I,
    predictor: Arc<Predictor>,
    cancel: CancellationToken,
) -> io::Result<()> {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            accepted = incoming.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        debug!(peer:% = peer; "client connected");

        let predictor = Arc::clone(&predictor);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = handle_connection(stream, &predictor) => match result {
                    Ok(answered) => debug!(peer:% = peer, requests = answered; "client disconnected"),
                    Err(e) => warn!(peer:% = peer; "connection failed: {e:#}"),
                },
            }
        });
    }
}

/// The `serve` mode: listens on every interface at `port`.
pub async fn run(
    predictor: Predictor,
    port: u16,
    cancel: CancellationToken,
) -> io::Result<()> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    info!(addr:% = listener.local_addr()?; "serving predictions");

    serve(listener, Arc::new(predictor), cancel).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use model::{
        ModelState, ParamLayout,
        config::{LayerConfig, ModelConfig},
    };
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tokio_test::io::Builder;
    use weights::Producer;

    use super::*;

    fn predictor() -> Predictor {
        let model = ModelConfig {
            layers: vec![LayerConfig {
                input: 2,
                output: 1,
                activation: None,
            }],
        };
        let layout = Arc::new(ParamLayout::for_model(&model));
        let state = ModelState::new(layout, vec![1.0, 2.0, 0.5], "hash").unwrap();

        Predictor::new(&model, &weights::extract_at(&state, Producer::Local, 0)).unwrap()
    }

    #[tokio::test]
    async fn test_answers_each_request_line() {
        let stream = Builder::new()
            .read(b"{\"inputs\": [[1.0, 1.0], [0.0, 2.0]]}\n")
            .write(b"{\"predictions\":[[3.5],[4.5]]}\n")
            .read(b"{\"inputs\": []}\n")
            .write(b"{\"predictions\":[]}\n")
            .build();

        let answered = handle_connection(stream, &predictor()).await.unwrap();
        assert_eq!(answered, 2);
    }

    #[test]
    fn test_bad_requests_get_an_error_line() {
        let predictor = predictor();

        let PredictResponse::Error { error } = respond(&predictor, "not json") else {
            panic!("expected an error response");
        };
        assert!(error.contains("malformed request"), "{error}");

        let PredictResponse::Error { error } = respond(&predictor, r#"{"inputs": [[1.0]]}"#) else {
            panic!("expected an error response");
        };
        assert!(error.contains("input record"), "{error}");
    }

    #[tokio::test]
    async fn test_connection_survives_a_bad_request() {
        let stream = Builder::new()
            .read(b"{\"inputs\": [[1.0]]}\n")
            .write(b"{\"error\":\"size mismatch in input record: got 1, expected 2\"}\n")
            .read(b"{\"inputs\": [[1.0, 1.0]]}\n")
            .write(b"{\"predictions\":[[3.5]]}\n")
            .build();

        assert_eq!(handle_connection(stream, &predictor()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_serves_over_tcp_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Arc::new(predictor()), cancel.clone()));

        let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
        client
            .get_mut()
            .write_all(b"{\"inputs\": [[1.0, 1.0]]}\n")
            .await
            .unwrap();

        let mut response = String::new();
        client.read_line(&mut response).await.unwrap();
        assert_eq!(response, "{\"predictions\":[[3.5]]}\n");

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_request_is_refused_and_skipped() {
        let oversized = vec![b'1'; MAX_REQUEST_LEN + 1];
        let refused = format!("{{\"error\":\"request exceeds {MAX_REQUEST_LEN} bytes\"}}\n");

        let stream = Builder::new()
            .read(&oversized)
            .read(b"\n{\"inputs\": [[1.0, 1.0]]}\n")
            .write(refused.as_bytes())
            .write(b"{\"predictions\":[[3.5]]}\n")
            .build();

        assert_eq!(handle_connection(stream, &predictor()).await.unwrap(), 2);
    }

    struct Exhausted {
        attempts: Arc<AtomicUsize>,
    }

    impl Incoming for Exhausted {
        type Conn = DuplexStream;

        async fn accept(&mut self) -> io::Result<(DuplexStream, SocketAddr)> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("too many open files"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_accepts_are_spaced_out() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let incoming = Exhausted {
            attempts: Arc::clone(&attempts),
        };
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(incoming, Arc::new(predictor()), cancel.clone()));

        time::sleep(ACCEPT_BACKOFF * 10).await;
        cancel.cancel();
        server.await.unwrap().unwrap();

        let attempts = attempts.load(Ordering::SeqCst);
        assert!((5..=11).contains(&attempts), "{attempts} accept attempts");
    }
}
