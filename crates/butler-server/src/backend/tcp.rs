//! Line-delimited TCP transports.
//!
//! Every message is one line of UTF-8 text terminated by `\n`. Messages must
//! not contain a raw newline; JSON payloads never do.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};

use super::{BusSubscription, Publisher, RequestReply};

fn strip_newline(mut line: Vec<u8>) -> String {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}

fn write_line<W: Write>(writer: &mut W, message: &str) -> io::Result<()> {
    writer.write_all(message.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Data-store client: a fresh connection per call.
#[derive(Debug, Clone)]
pub struct TcpRequestReply {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpRequestReply {
    /// `timeout` bounds each of connect, write and read.
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// Perform one call, surfacing transport errors.
    pub fn try_request(&self, request: &str) -> io::Result<String> {
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;

        let mut writer = &stream;
        write_line(&mut writer, request)?;

        let mut reader = BufReader::new(&stream);
        let mut reply = Vec::new();
        if reader.read_until(b'\n', &mut reply)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "data store closed without replying",
            ));
        }
        Ok(strip_newline(reply))
    }
}

impl RequestReply for TcpRequestReply {
    fn request(&self, request: &str) -> String {
        match self.try_request(request) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Data store {} call failed: {}", self.addr, e);
                String::new()
            }
        }
    }
}

/// Broadcast bus publisher backed by a dedicated writer thread.
///
/// The connection is opened lazily and dropped on the first write error;
/// the failed message is lost and the next one reconnects.
pub struct TcpPublisher {
    tx: Sender<String>,
}

impl TcpPublisher {
    /// Spawn the writer thread. It exits once the publisher is dropped.
    pub fn start(addr: SocketAddr, connect_timeout: Duration) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        thread::Builder::new()
            .name("butler-bus-publisher".to_string())
            .spawn(move || run_publisher(addr, connect_timeout, rx))?;
        Ok(Self { tx })
    }
}

impl Publisher for TcpPublisher {
    fn publish(&self, message: String) {
        if self.tx.send(message).is_err() {
            warn!("Bus publisher thread is gone, message dropped");
        }
    }
}

fn run_publisher(addr: SocketAddr, connect_timeout: Duration, rx: Receiver<String>) {
    let mut stream: Option<TcpStream> = None;

    for message in rx.iter() {
        if stream.is_none() {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(s) => {
                    info!("Connected to bus publish endpoint {}", addr);
                    stream = Some(s);
                }
                Err(e) => {
                    warn!("Bus {} unreachable, message dropped: {}", addr, e);
                    continue;
                }
            }
        }

        if let Some(s) = stream.as_mut() {
            if let Err(e) = write_line(s, &message) {
                warn!("Bus publish to {} failed, message dropped: {}", addr, e);
                stream = None;
            }
        }
    }

    debug!("Bus publisher for {} stopped", addr);
}

/// Long-lived subscription to the broadcast bus.
///
/// Connects on first use and again after any error. A line split across
/// reads is kept in `line` until its newline arrives.
pub struct TcpBusSubscription {
    addr: SocketAddr,
    reader: Option<BufReader<TcpStream>>,
    line: Vec<u8>,
}

impl TcpBusSubscription {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            reader: None,
            line: Vec::new(),
        }
    }

    fn connect(&mut self, timeout: Duration) -> io::Result<()> {
        if self.reader.is_none() {
            let stream = TcpStream::connect_timeout(&self.addr, timeout)?;
            info!("Subscribed to bus at {}", self.addr);
            self.line.clear();
            self.reader = Some(BufReader::new(stream));
        }
        Ok(())
    }
}

impl BusSubscription for TcpBusSubscription {
    fn next_message(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        self.connect(timeout)?;
        let Some(reader) = self.reader.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        reader.get_ref().set_read_timeout(Some(timeout))?;

        match reader.read_until(b'\n', &mut self.line) {
            Ok(0) => {
                self.reader = None;
                Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "bus closed the subscription",
                ))
            }
            Ok(_) if self.line.last() == Some(&b'\n') => {
                Ok(Some(strip_newline(std::mem::take(&mut self.line))))
            }
            // EOF in the middle of a line.
            Ok(_) => {
                self.reader = None;
                Err(io::ErrorKind::UnexpectedEof.into())
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => {
                self.reader = None;
                Err(e)
            }
        }
    }
}
