//! A simulated dining-philosophers target speaking the trace protocol over
//! loopback TCP.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use emx_tracespec::decoder::encode_record;
use emx_tracespec::frame::Deframer;
use emx_tracespec::record::rec;
use emx_tracespec::{
    load_suite, Engine, RunConfig, Session, TestResult, TestRunner, TraceRecord,
};
use tempfile::TempDir;

pub const EAT_SIG: u64 = 6;
/// The philosopher starts eating but never finishes its step.
pub const HUNGRY_SIG: u64 = 7;
/// Completes normally, then emits one record nobody asked for.
pub const NOISY_SIG: u64 = 8;
/// The dispatcher trips an assertion and the target stops answering.
pub const TIMEOUT_SIG: u64 = 9;
/// Application command that corrupts the stream.
pub const GARBAGE_CMD: u8 = 0xEE;

pub struct SimTarget {
    pub addr: SocketAddr,
    /// Command ids in the order they arrived
    pub received: Arc<Mutex<Vec<u8>>>,
}

impl SimTarget {
    /// Serve connections one after another on a detached thread; each
    /// connection is one session.
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let mut conn = Connection {
                    stream,
                    seq: 0,
                    clock: 0,
                    received: log.clone(),
                };
                conn.serve();
            }
        });
        Self { addr, received }
    }

    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }
}

struct Connection {
    stream: TcpStream,
    seq: u8,
    clock: u32,
    received: Arc<Mutex<Vec<u8>>>,
}

impl Connection {
    fn serve(&mut self) {
        let mut deframer = Deframer::new();
        let mut buf = [0u8; 256];
        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for &b in &buf[..n] {
                if let Some(Ok(frame)) = deframer.push(b) {
                    if frame.len() >= 2 && self.handle(frame[1], &frame[2..]).is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn send(&mut self, rec_id: u8, stamped: bool, text: &str) -> std::io::Result<()> {
        self.seq = self.seq.wrapping_add(1);
        let timestamp = stamped.then(|| {
            self.clock += 10;
            self.clock
        });
        let record = TraceRecord::new(self.seq, rec_id, timestamp, text);
        self.stream.write_all(&encode_record(&record))
    }

    /// A user record whose text was altered after the checksum was computed.
    fn send_corrupted(&mut self) -> std::io::Result<()> {
        self.seq = self.seq.wrapping_add(1);
        let record = TraceRecord::new(self.seq, rec::USER, None, "Garbage");
        let mut bytes = encode_record(&record).to_vec();
        if let Some(i) = bytes.windows(4).position(|w| w == b"rbag") {
            bytes[i] ^= 0x01;
        }
        self.stream.write_all(&bytes)
    }

    fn ack(&mut self, name: &str) -> std::io::Result<()> {
        self.send(rec::RX_STATUS, false, &format!("Trg-Ack {}", name))
    }

    fn done(&mut self, name: &str) -> std::io::Result<()> {
        self.send(rec::TARGET_DONE, true, &format!("Trg-Done {}", name))
    }

    fn handle(&mut self, id: u8, payload: &[u8]) -> std::io::Result<()> {
        self.received.lock().unwrap().push(id);
        match id {
            0 => self.send(rec::TARGET_INFO, false, "Trg-Info QP-Ver=720"),
            1 => {
                if payload.first() == Some(&GARBAGE_CMD) {
                    self.ack("QS_RX_COMMAND")?;
                    return self.send_corrupted();
                }
                self.ack("QS_RX_COMMAND")?;
                self.send(rec::USER, true, &format!("Command id={}", payload.first().copied().unwrap_or(0)))?;
                self.done("QS_RX_COMMAND")
            }
            2 => {
                self.seq = 0;
                self.clock = 0;
                self.send(rec::TARGET_INFO, false, "Trg-Info QP-Ver=720")?;
                self.send(rec::OBJ_DICT, false, "ObjDic 0x20000100 AO_Philo")?;
                self.send(rec::OBJ_DICT, false, "ObjDic 0x20000200 AP_Table")?;
                self.send(rec::FUN_DICT, false, "FunDic 0x08000400 Philo_think")?;
                self.send(rec::SIG_DICT, false, "SigDic 6 EAT_SIG")?;
                self.send(rec::SIG_DICT, false, "SigDic 7 HUNGRY_SIG")?;
                self.send(rec::SIG_DICT, false, "SigDic 8 NOISY_SIG")?;
                self.send(rec::SIG_DICT, false, "SigDic 9 TIMEOUT_SIG")?;
                self.send(rec::TEST_PAUSED, false, "TstPause")
            }
            3 => {
                self.ack("QS_RX_TICK")?;
                self.send(rec::USER, true, "Tick Philo timeout")?;
                self.done("QS_RX_TICK")
            }
            4 => self.send(rec::PEEK_DATA, false, "Trg-Peek Offs=0,Size=1,Num=1,Data=<00>"),
            5 => self.ack("QS_RX_POKE"),
            6 => self.ack("QS_RX_FILL"),
            7 => self.ack("QS_RX_TEST_SETUP"),
            8 => self.ack("QS_RX_TEST_TEARDOWN"),
            9 => self.ack("QS_RX_TEST_PROBE"),
            10 => self.ack("QS_RX_GLB_FILTER"),
            11 => self.ack("QS_RX_LOC_FILTER"),
            12 => self.ack("QS_RX_AO_FILTER"),
            13 => self.ack("QS_RX_CURR_OBJ"),
            14 => self.ack("QS_RX_TEST_CONTINUE"),
            15 => self.send(rec::QUERY_DATA, false, "Query-SM Obj=AO_Philo,State=thinking"),
            16 => {
                self.ack("QS_RX_EVENT")?;
                // prio u8, sig u16, len u16, params
                let sig = payload
                    .get(1..3)
                    .map_or(0, |b| u64::from(u16::from_le_bytes([b[0], b[1]])));
                let arg = payload.get(5).copied().unwrap_or(0);
                match sig {
                    EAT_SIG => {
                        self.send(rec::USER, true, &format!("Philo-Eat n={}", arg))?;
                        self.done("QS_RX_EVENT")
                    }
                    HUNGRY_SIG => self.send(rec::USER, true, "Philo-Hungry"),
                    NOISY_SIG => {
                        self.done("QS_RX_EVENT")?;
                        self.send(rec::USER, true, "Philo-Burp")
                    }
                    TIMEOUT_SIG => {
                        self.send(rec::USER, true, "Disp===> Obj=AO_Philo,Sig=TIMEOUT_SIG")?;
                        self.send(rec::ASSERT_FAIL, true, "=ASSERT= Mod=qf_actq,Loc=110")
                    }
                    _ => self.done("QS_RX_EVENT"),
                }
            }
            _ => self.send(rec::RX_STATUS, false, "Trg-ERR QS_RX_UNKNOWN"),
        }
    }
}

/// A scratch directory holding one script.
pub struct Script {
    _dir: TempDir,
    pub path: PathBuf,
}

pub fn write_script(name: &str, text: &str) -> Script {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{}.tspec", name));
    std::fs::write(&path, text).unwrap();
    Script { _dir: dir, path }
}

pub fn config() -> RunConfig {
    RunConfig {
        timeout: Duration::from_millis(300),
        ..Default::default()
    }
}

/// Load `text` as a script and run it against `target`.
pub fn run_script(target: &SimTarget, text: &str, config: RunConfig) -> TestResult {
    let script = write_script("suite", text);
    let engine = Arc::new(Engine::new());
    let suite = load_suite(&engine, &script.path).unwrap();
    let mut session = Session::connect(target.addr, config.session_config()).unwrap();
    let result = TestRunner::new(config).run(&mut session, &suite);
    session.close();
    result
}
