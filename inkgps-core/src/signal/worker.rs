//! Background gpsd reader thread.
//!
//! Reads newline-delimited JSON with a socket read timeout so the stop flag
//! is polled at least once per timeout. A partial line survives a timeout
//! in the line buffer. Transient I/O errors move the signal to
//! `Reconnecting` and the reader reconnects after `reconnect_delay`.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::gpsd::{self, Fix, GpsdMessage, WATCH_DISABLE, WATCH_ENABLE};
use super::{lock, ConnectionState, SignalConfig, SignalState, UpdateSlot};
use crate::types::{GpsError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Extra wait after shutting the socket down under a stuck reader.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const MAX_LOGGED_LINE: usize = 80;
/// Longest protocol line kept in memory. gpsd's own limit is far below this.
const MAX_LINE_LEN: usize = 16 * 1024;

/// Open a TCP connection to gpsd, trying each resolved address in turn.
pub(crate) fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| GpsError::Connection(format!("{host}:{port}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(GpsError::Connection(match last_error {
        Some(e) => format!("{host}:{port}: {e}"),
        None => format!("{host}:{port}: no address resolved"),
    }))
}

/// Shared handles the reader thread needs.
pub(crate) struct WorkerContext {
    pub config: SignalConfig,
    pub state: Arc<Mutex<SignalState>>,
    pub on_update: UpdateSlot,
}

/// Handle to a running reader thread.
pub(crate) struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    /// Clone of the current connection, used to unblock a stuck reader.
    stream: Arc<Mutex<Option<TcpStream>>>,
}

impl Worker {
    pub(crate) fn spawn(ctx: WorkerContext, stream: TcpStream) -> Result<Worker> {
        let stop = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(Mutex::new(None));
        let reader = Reader {
            ctx,
            stop: Arc::clone(&stop),
            stream: Arc::clone(&slot),
            stats: ReaderStats::default(),
        };
        let handle = thread::Builder::new()
            .name("inkgps-gpsd".to_string())
            .spawn(move || reader.run(stream))?;
        Ok(Worker {
            handle,
            stop,
            stream: slot,
        })
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait up to `timeout` for the reader to exit. If it is still blocked,
    /// shut the socket down under it and wait a little longer before
    /// detaching. Returns true if the thread exited.
    pub(crate) fn join(self, timeout: Duration) -> bool {
        if !self.wait(timeout) {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "gpsd reader did not stop in time, closing its connection"
            );
            if let Some(stream) = lock(&self.stream).as_ref() {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    debug!(error = %e, "Socket shutdown failed");
                }
            }
            if !self.wait(SHUTDOWN_GRACE) {
                warn!("gpsd reader still running, detaching it");
                return false;
            }
        }
        if self.handle.join().is_err() {
            warn!("gpsd reader panicked");
        }
        true
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
        true
    }
}

#[derive(Debug, Default)]
struct ReaderStats {
    lines: u64,
    accepted: u64,
    duplicates: u64,
    too_slow: u64,
    malformed: u64,
}

struct Reader {
    ctx: WorkerContext,
    stop: Arc<AtomicBool>,
    stream: Arc<Mutex<Option<TcpStream>>>,
    stats: ReaderStats,
}

impl Reader {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run(mut self, first: TcpStream) {
        let host = self.ctx.config.host.clone();
        let port = self.ctx.config.port;
        info!(host = %host, port, "gpsd reader started");

        let mut next = Some(first);
        while !self.stopped() {
            let stream = match next.take() {
                Some(stream) => stream,
                None => match connect(&host, port) {
                    Ok(stream) => {
                        info!(host = %host, port, "Reconnected to gpsd");
                        stream
                    }
                    Err(e) => {
                        warn!(error = %e, "gpsd reconnect failed");
                        self.pause();
                        continue;
                    }
                },
            };

            match self.read_session(stream) {
                Ok(()) => break,
                Err(_) if self.stopped() => break,
                Err(e) => {
                    warn!(error = %e, "gpsd connection lost, reconnecting");
                    self.set_connection(ConnectionState::Reconnecting);
                    self.pause();
                }
            }
        }

        *lock(&self.stream) = None;
        info!(
            lines = self.stats.lines,
            accepted = self.stats.accepted,
            duplicates = self.stats.duplicates,
            too_slow = self.stats.too_slow,
            malformed = self.stats.malformed,
            "gpsd reader stopped"
        );
    }

    /// Sleep for the reconnect delay, waking early on stop.
    fn pause(&self) {
        let deadline = Instant::now() + self.ctx.config.reconnect_delay;
        while !self.stopped() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Read one connection until stop (`Ok`) or an I/O failure (`Err`).
    fn read_session(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_read_timeout(Some(self.ctx.config.read_timeout))?;
        let mut writer = stream.try_clone()?;
        *lock(&self.stream) = Some(stream.try_clone()?);

        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        // Set while skipping the rest of an overlong line.
        let mut discarding = false;
        loop {
            if self.stopped() {
                self.close_session(&mut reader, &mut writer);
                return Ok(());
            }

            let budget = (MAX_LINE_LEN + 1).saturating_sub(line.len()) as u64;
            match (&mut reader).take(budget).read_until(b'\n', &mut line) {
                Ok(0) => {
                    return Err(GpsError::Connection(
                        "gpsd closed the connection".to_string(),
                    ))
                }
                Ok(_) if !line.ends_with(b"\n") && line.len() > MAX_LINE_LEN => {
                    if !discarding {
                        self.stats.malformed += 1;
                        warn!(limit = MAX_LINE_LEN, "Discarding overlong gpsd line");
                    }
                    line.clear();
                    discarding = true;
                }
                Ok(_) if discarding => {
                    line.clear();
                    discarding = false;
                }
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    line.clear();
                    self.handle_line(&text, &mut writer)?;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    trace!("No gpsd data (timeout)");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Disable the watch, close our half of the connection, and drain what
    /// gpsd already sent so the socket closes without a reset.
    fn close_session(&self, reader: &mut BufReader<TcpStream>, writer: &mut TcpStream) {
        if let Err(e) = writer
            .write_all(WATCH_DISABLE.as_bytes())
            .and_then(|()| writer.flush())
        {
            debug!(error = %e, "Failed to disable gpsd watch");
        }
        if let Err(e) = writer.shutdown(Shutdown::Write) {
            debug!(error = %e, "Socket shutdown failed");
        }

        let deadline = Instant::now() + self.ctx.config.read_timeout;
        while Instant::now() < deadline {
            let pending = match reader.fill_buf() {
                Ok(buf) => buf.len(),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            if pending == 0 {
                break;
            }
            reader.consume(pending);
        }
    }

    fn handle_line(&mut self, line: &str, writer: &mut TcpStream) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        self.stats.lines += 1;

        let message = match gpsd::parse_line(line) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed += 1;
                warn!(error = %e, line = preview(line), "Skipping malformed gpsd message");
                return Ok(());
            }
        };

        match message {
            GpsdMessage::Version(version) => {
                info!(
                    release = ?version.release,
                    proto_major = ?version.proto_major,
                    proto_minor = ?version.proto_minor,
                    "gpsd handshake"
                );
                writer.write_all(WATCH_ENABLE.as_bytes())?;
                writer.flush()?;
                self.set_connection(ConnectionState::Streaming);
            }
            GpsdMessage::Tpv(tpv) => match tpv.to_fix() {
                Some(fix) => self.apply_fix(fix),
                None => trace!(mode = tpv.mode, "TPV without a usable fix"),
            },
            GpsdMessage::Sky(sky) => {
                let counts = sky.counts();
                let mut state = lock(&self.ctx.state);
                if !self.stopped() {
                    state.satellites = counts;
                }
                debug!(visible = counts.visible, used = counts.used, "Satellites");
            }
            GpsdMessage::Device | GpsdMessage::Devices | GpsdMessage::Watch => {
                debug!(line = preview(line), "gpsd acknowledgement");
            }
            GpsdMessage::Unknown => {
                debug!(line = preview(line), "Ignoring unknown gpsd message class");
            }
        }
        Ok(())
    }

    /// Accept or reject a fix under the state lock, then notify outside it.
    fn apply_fix(&mut self, fix: Fix) {
        let callback = lock(&self.ctx.on_update).clone();
        let snapshot = {
            let mut state = lock(&self.ctx.state);
            if self.stopped() {
                return;
            }
            if !fix.is_new_measurement(state.last_fix.as_ref()) {
                self.stats.duplicates += 1;
                trace!(lat = fix.lat, lon = fix.lon, "Duplicate fix rejected");
                return;
            }
            let speed = fix.speed.unwrap_or(0.0);
            if speed <= self.ctx.config.min_speed {
                self.stats.too_slow += 1;
                trace!(speed, min_speed = self.ctx.config.min_speed, "Slow fix rejected");
                return;
            }

            self.stats.accepted += 1;
            if self.stats.accepted == 1 {
                info!(
                    lat = format!("{:.5}", fix.lat),
                    lon = format!("{:.5}", fix.lon),
                    mode = fix.mode,
                    "First gpsd fix accepted"
                );
            }
            state.accept_fix(fix, self.ctx.config.pass_threshold);

            match &callback {
                Some(_) if state.live_track.len() >= 2 => Some(state.live_track.snapshot()),
                _ => None,
            }
        };

        if let (Some(callback), Some(track)) = (callback, snapshot) {
            if !self.stopped() {
                callback(&track);
            }
        }
    }

    fn set_connection(&self, connection: ConnectionState) {
        let mut state = lock(&self.ctx.state);
        if !self.stopped() {
            state.connection = connection;
        }
    }
}

fn preview(line: &str) -> &str {
    match line.char_indices().nth(MAX_LOGGED_LINE) {
        Some((i, _)) => &line[..i],
        None => line,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    use super::super::{Signal, UpdateCallback};
    use crate::track::Track;
    use super::*;

    const VERSION: &str =
        "{\"class\":\"VERSION\",\"release\":\"3.22\",\"proto_major\":3,\"proto_minor\":14}\n";

    fn tpv(lat: f64, lon: f64, speed: f64) -> String {
        format!(
            "{{\"class\":\"TPV\",\"mode\":3,\"time\":\"2024-05-01T10:00:00Z\",\"lat\":{lat},\"lon\":{lon},\"speed\":{speed}}}\n"
        )
    }

    fn test_config(port: u16) -> SignalConfig {
        SignalConfig {
            host: "127.0.0.1".to_string(),
            port,
            read_timeout: Duration::from_millis(50),
            reconnect_delay: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(1),
            ..SignalConfig::default()
        }
    }

    /// Accept `connections` clients in turn and hand each to `script`.
    fn fake_gpsd<F>(connections: usize, script: F) -> (u16, JoinHandle<()>)
    where
        F: Fn(usize, TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            for n in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                script(n, stream);
            }
        });
        (port, handle)
    }

    /// Send the handshake and return the client's WATCH command.
    fn handshake(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>) -> String {
        stream.write_all(VERSION.as_bytes()).unwrap();
        let mut watch = String::new();
        reader.read_line(&mut watch).unwrap();
        watch
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_two_fixes_then_duplicate() {
        let (port, server) = fake_gpsd(1, |_, mut stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let watch = handshake(&mut stream, &mut reader);
            assert!(watch.starts_with("?WATCH="));
            assert!(watch.contains("\"enable\":true"));

            let lines = [
                "{\"class\":\"DEVICES\",\"devices\":[]}\n".to_string(),
                "{\"class\":\"WATCH\",\"enable\":true,\"json\":true}\n".to_string(),
                tpv(52.0, 4.0, 1.5),
                tpv(52.0001, 4.0, 1.5),
                tpv(52.0001, 4.0, 1.5),
                "{\"class\":\"SKY\",\"satellites\":[{\"used\":true},{\"used\":true},{\"used\":false}]}\n"
                    .to_string(),
            ];
            for line in &lines {
                stream.write_all(line.as_bytes()).unwrap();
            }

            let mut disable = String::new();
            reader.read_line(&mut disable).unwrap();
            assert!(disable.contains("\"enable\":false"), "got {disable:?}");
        });

        let signal = Signal::new(test_config(port));
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        signal.on_update(move |track| {
            assert!(track.len() >= 2);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.start_tracking().unwrap();
        assert!(wait_for(|| signal.satellites().used == 2), "SKY not applied");
        assert_eq!(signal.connection_state(), ConnectionState::Streaming);

        // SKY arrives after the duplicate, so every fix has been handled
        assert_eq!(signal.live_track().len(), 2);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(signal.speed(), Some(1.5));
        assert!(signal.current_bearing().unwrap().abs() < 1e-6);

        signal.stop_tracking();
        assert_eq!(signal.connection_state(), ConnectionState::Idle);
        server.join().unwrap();
    }

    #[test]
    fn test_slow_and_unlocked_fixes_rejected() {
        let (port, server) = fake_gpsd(1, |_, mut stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            handshake(&mut stream, &mut reader);
            let lines = [
                tpv(52.0, 4.0, 0.1),
                "{\"class\":\"TPV\",\"mode\":3,\"lat\":52.1,\"lon\":4.1}\n".to_string(),
                "{\"class\":\"TPV\",\"mode\":1,\"lat\":52.2,\"lon\":4.2,\"speed\":3.0}\n".to_string(),
                "not json at all\n".to_string(),
                "{\"class\":\"PPS\"}\n".to_string(),
                tpv(52.3, 4.3, 3.0),
                "{\"class\":\"SKY\",\"satellites\":[{\"used\":true}]}\n".to_string(),
            ];
            for line in &lines {
                stream.write_all(line.as_bytes()).unwrap();
            }
            let mut rest = String::new();
            let _ = reader.read_line(&mut rest);
        });

        let signal = Signal::new(test_config(port));
        signal.start_tracking().unwrap();
        assert!(wait_for(|| signal.satellites().used == 1));

        let live = signal.live_track();
        assert_eq!(live.len(), 1, "only the fast, locked fix is kept");
        assert_eq!(live.points()[0].latitude(), 52.3);

        signal.stop_tracking();
        server.join().unwrap();
    }

    #[test]
    fn test_partial_line_across_timeout() {
        let (port, server) = fake_gpsd(1, |_, mut stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            handshake(&mut stream, &mut reader);
            let line = tpv(52.0, 4.0, 2.0);
            let (head, tail) = line.split_at(20);
            stream.write_all(head.as_bytes()).unwrap();
            stream.flush().unwrap();
            // Longer than the client's read timeout
            thread::sleep(Duration::from_millis(200));
            stream.write_all(tail.as_bytes()).unwrap();
            let mut rest = String::new();
            let _ = reader.read_line(&mut rest);
        });

        let signal = Signal::new(test_config(port));
        signal.start_tracking().unwrap();
        assert!(wait_for(|| signal.live_track().len() == 1));

        signal.stop_tracking();
        server.join().unwrap();
    }

    #[test]
    fn test_stop_while_blocked_on_read() {
        let (port, server) = fake_gpsd(1, |_, mut stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            handshake(&mut stream, &mut reader);
            stream.write_all(tpv(52.0, 4.0, 2.0).as_bytes()).unwrap();

            // Wait for the client to leave, then try to sneak in another fix
            let mut rest = String::new();
            let _ = reader.read_line(&mut rest);
            let _ = stream.write_all(tpv(52.1, 4.1, 2.0).as_bytes());
        });

        let signal = Signal::new(test_config(port));
        signal.start_tracking().unwrap();
        assert!(wait_for(|| signal.live_track().len() == 1));

        let started = Instant::now();
        signal.stop_tracking();
        assert!(started.elapsed() < Duration::from_secs(2), "stop must be bounded");
        assert!(!signal.is_tracking());

        server.join().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(signal.live_track().len(), 1);
        assert_eq!(signal.connection_state(), ConnectionState::Idle);
    }

    #[test]
    fn test_reconnects_after_server_drop() {
        let (port, server) = fake_gpsd(2, |n, mut stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            handshake(&mut stream, &mut reader);
            if n == 0 {
                stream.write_all(tpv(52.0, 4.0, 2.0).as_bytes()).unwrap();
                // Dropping the stream closes the first connection
                return;
            }
            stream.write_all(tpv(52.001, 4.0, 2.0).as_bytes()).unwrap();
            let mut rest = String::new();
            let _ = reader.read_line(&mut rest);
        });

        let signal = Signal::new(test_config(port));
        signal.start_tracking().unwrap();
        assert!(wait_for(|| signal.live_track().len() == 2), "fixes from both sessions");
        assert!(wait_for(|| signal.connection_state() == ConnectionState::Streaming));

        signal.stop_tracking();
        server.join().unwrap();
    }

    #[test]
    fn test_follow_route_progress() {
        let route = crate::track::Track::new(
            "route",
            vec![
                crate::coordinate::Coordinate::new(52.0, 4.0),
                crate::coordinate::Coordinate::new(52.001, 4.0),
            ],
        );
        let (port, server) = fake_gpsd(1, |_, mut stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            handshake(&mut stream, &mut reader);
            stream.write_all(tpv(52.0, 4.00001, 2.0).as_bytes()).unwrap();
            stream.write_all(tpv(52.0005, 4.0, 2.0).as_bytes()).unwrap();
            let mut rest = String::new();
            let _ = reader.read_line(&mut rest);
        });

        let signal = Signal::new(test_config(port));
        signal.follow(Some(route));
        signal.start_tracking().unwrap();
        assert!(wait_for(|| signal.live_track().len() == 2));

        // First fix is ~0.7m from the start, the second is ~55m short of the end
        assert_eq!(signal.route().unwrap().passed_count(), 1);

        signal.stop_tracking();
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let signal = Signal::new(test_config(port));
        let err = signal.start_tracking().unwrap_err();
        assert!(matches!(err, GpsError::Connection(_)));
        assert_eq!(signal.connection_state(), ConnectionState::Idle);
        assert!(!signal.is_tracking());
        assert_eq!(signal.history_len(), 0);
    }

    #[test]
    fn test_start_twice_is_busy() {
        // The client may stop before it has read VERSION; it must still
        // disable the watch and close cleanly.
        let (port, server) = fake_gpsd(1, |_, mut stream| {
            let reader = BufReader::new(stream.try_clone().unwrap());
            stream.write_all(VERSION.as_bytes()).unwrap();
            let received: Vec<String> = reader.lines().map_while(|l| l.ok()).collect();
            assert!(
                received.iter().any(|l| l.contains("\"enable\":false")),
                "got {received:?}"
            );
        });

        let signal = Signal::new(test_config(port));
        signal.start_tracking().unwrap();
        assert!(matches!(signal.start_tracking(), Err(GpsError::Busy(_))));
        let source = crate::track::Track::new(
            "t",
            vec![
                crate::coordinate::Coordinate::new(1.0, 1.0),
                crate::coordinate::Coordinate::new(1.001, 1.0),
            ],
        );
        assert!(matches!(
            signal.simulate(&source, 15.0, |_| {}),
            Err(GpsError::Busy(_))
        ));

        signal.stop_tracking();
        server.join().unwrap();
    }

    #[test]
    fn test_stop_before_handshake_disables_watch() {
        let (port, server) = fake_gpsd(1, |_, mut stream| {
            let reader = BufReader::new(stream.try_clone().unwrap());
            // Unread data queued on the client side when it stops
            stream.write_all(VERSION.as_bytes()).unwrap();
            stream.write_all(tpv(52.0, 4.0, 2.0).as_bytes()).unwrap();
            let received: Vec<String> = reader.lines().map_while(|l| l.ok()).collect();
            assert_eq!(
                received.last().map(String::as_str),
                Some(WATCH_DISABLE.trim_end()),
                "got {received:?}"
            );
        });

        let signal = Signal::new(test_config(port));
        signal.start_tracking().unwrap();
        signal.stop_tracking();
        server.join().unwrap();
    }

    #[test]
    fn test_overlong_line_skipped() {
        let (port, server) = fake_gpsd(1, |_, mut stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            handshake(&mut stream, &mut reader);
            let junk = "x".repeat(MAX_LINE_LEN * 3) + "\n";
            stream.write_all(junk.as_bytes()).unwrap();
            stream.write_all(tpv(52.0, 4.0, 2.0).as_bytes()).unwrap();
            stream
                .write_all(b"{\"class\":\"SKY\",\"satellites\":[{\"used\":true}]}\n")
                .unwrap();
            let mut rest = String::new();
            let _ = reader.read_line(&mut rest);
        });

        let signal = Signal::new(test_config(port));
        signal.start_tracking().unwrap();
        assert!(wait_for(|| signal.satellites().used == 1), "reader kept going");
        assert_eq!(signal.live_track().len(), 1);
        assert_eq!(signal.connection_state(), ConnectionState::Streaming);

        signal.stop_tracking();
        server.join().unwrap();
    }

    #[test]
    fn test_stopped_reader_does_not_notify() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: UpdateCallback = Arc::new(move |_track: &Track| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let state = Arc::new(Mutex::new(SignalState::default()));
        let mut reader = Reader {
            ctx: WorkerContext {
                config: SignalConfig::default(),
                state: Arc::clone(&state),
                on_update: Arc::new(Mutex::new(Some(callback))),
            },
            stop: Arc::new(AtomicBool::new(false)),
            stream: Arc::new(Mutex::new(None)),
            stats: ReaderStats::default(),
        };
        let fix = |lat: f64| Fix {
            mode: 3,
            lat,
            lon: 4.0,
            alt: None,
            speed: Some(2.0),
            time: None,
        };

        reader.apply_fix(fix(52.0));
        reader.apply_fix(fix(52.001));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        reader.stop.store(true, Ordering::SeqCst);
        reader.apply_fix(fix(52.002));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(lock(&state).live_track.len(), 2);
        assert_eq!(reader.stats.accepted, 2);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).len(), MAX_LOGGED_LINE);
        assert_eq!(preview("short"), "short");
    }
}
