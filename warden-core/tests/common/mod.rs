// Minimal in-process Redis speaking RESP2, enough for the broker and signal
// store. Blocking pops hold their connection like a real server does.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

#[derive(Default)]
struct Store {
    lists: HashMap<String, VecDeque<String>>,
    strings: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
}

#[derive(Clone)]
pub struct FakeRedis {
    addr: SocketAddr,
    store: Arc<Mutex<Store>>,
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Mutex::new(Store::default()));

        let accept_store = store.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let store = accept_store.clone();
                tokio::spawn(serve(stream, store));
            }
        });

        Self { addr, store }
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        let store = self.store.lock().unwrap();
        store
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// LPUSH from outside any client connection.
    pub fn lpush(&self, key: &str, value: &str) {
        let mut store = self.store.lock().unwrap();
        store
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.store.lock().unwrap().strings.get(key).cloned()
    }

    pub fn set_string(&self, key: &str, value: &str) {
        self.store
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), value.to_string());
    }
}

async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<String>>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count: usize = line
        .trim_end()
        .strip_prefix('*')
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len: usize = line
            .trim_end()
            .strip_prefix('$')
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await?;
        buf.truncate(len);
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(Some(args))
}

fn bulk(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("${}\r\n{}\r\n", v.len(), v),
        None => "$-1\r\n".to_string(),
    }
}

fn int(n: usize) -> String {
    format!(":{n}\r\n")
}

fn pop_push(store: &Mutex<Store>, src: &str, dst: &str) -> Option<String> {
    let mut store = store.lock().unwrap();
    let value = store.lists.get_mut(src)?.pop_back()?;
    store
        .lists
        .entry(dst.to_string())
        .or_default()
        .push_front(value.clone());
    Some(value)
}

async fn serve(stream: TcpStream, store: Arc<Mutex<Store>>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    while let Ok(Some(args)) = read_command(&mut reader).await {
        let name = args.first().map(|a| a.to_ascii_uppercase()).unwrap_or_default();
        let reply = match name.as_str() {
            "PING" => "+PONG\r\n".to_string(),
            "CLIENT" | "SELECT" => "+OK\r\n".to_string(),
            "LPUSH" => {
                let mut s = store.lock().unwrap();
                let list = s.lists.entry(args[1].clone()).or_default();
                for value in &args[2..] {
                    list.push_front(value.clone());
                }
                int(list.len())
            }
            "RPOPLPUSH" => bulk(pop_push(&store, &args[1], &args[2]).as_deref()),
            "BRPOPLPUSH" => {
                let secs: f64 = args[3].parse().unwrap_or(0.0);
                let deadline = Instant::now() + Duration::from_secs_f64(secs);
                loop {
                    if let Some(value) = pop_push(&store, &args[1], &args[2]) {
                        break bulk(Some(&value));
                    }
                    if Instant::now() >= deadline {
                        break bulk(None);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
            "LREM" => {
                let mut s = store.lock().unwrap();
                let limit: usize = args[2].parse().unwrap_or(0);
                let mut removed = 0;
                if let Some(list) = s.lists.get_mut(&args[1]) {
                    while limit == 0 || removed < limit {
                        match list.iter().position(|v| *v == args[3]) {
                            Some(pos) => {
                                list.remove(pos);
                                removed += 1;
                            }
                            None => break,
                        }
                    }
                }
                int(removed)
            }
            "LLEN" => {
                let s = store.lock().unwrap();
                int(s.lists.get(&args[1]).map(|l| l.len()).unwrap_or(0))
            }
            "SET" => {
                store
                    .lock()
                    .unwrap()
                    .strings
                    .insert(args[1].clone(), args[2].clone());
                "+OK\r\n".to_string()
            }
            "GET" => {
                let s = store.lock().unwrap();
                bulk(s.strings.get(&args[1]).map(String::as_str))
            }
            "SADD" => {
                let mut s = store.lock().unwrap();
                let set = s.sets.entry(args[1].clone()).or_default();
                let added = args[2..].iter().filter(|m| set.insert((*m).clone())).count();
                int(added)
            }
            "EXPIRE" => int(1),
            _ => format!("-ERR unknown command '{name}'\r\n"),
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}
