//! Pipedrive adapter against a local HTTP stub, through the paced client.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crmsync_core::{ApiConfig, ApiToken, PersonId, RetrySettings};
use crmsync_crm::{CrmApi, PacedApi, PipedriveClient};

#[derive(Debug, Clone)]
struct Seen {
    line: String,
    body: String,
    at: Instant,
}

struct Stub {
    base_url: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Stub {
    /// Serve `expected` requests, one connection each, then stop.
    fn start(expected: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        thread::spawn(move || {
            for stream in listener.incoming().take(expected) {
                match stream {
                    Ok(stream) => handle(stream, &log),
                    Err(_) => break,
                }
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            seen,
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("lock").clone()
    }
}

fn handle(mut stream: TcpStream, log: &Mutex<Vec<Seen>>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut request_line = String::new();
    reader.read_line(&mut request_line).expect("request line");

    let mut content_length = 0;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).expect("header");
        if header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).expect("body");

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default();
    let line = format!("{method} {path}");
    let payload = respond(&line);
    log.lock().expect("lock").push(Seen {
        line,
        body: String::from_utf8_lossy(&body).into_owned(),
        at: Instant::now(),
    });

    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        payload.len(),
        payload
    )
    .expect("write response");
}

fn respond(line: &str) -> &'static str {
    match line {
        "GET /personFields" => {
            r#"{"success":true,"data":[
                {"key":"label","name":"Label","options":[{"id":5,"label":"customer"},{"id":7,"label":"not in db"}]},
                {"key":"abc","name":"All LIGR Organizations"}]}"#
        }
        "GET /persons" => {
            r#"{"success":true,"data":[
                {"id":1,"name":"Ann","email":[{"value":"ann@x.com"}],"label_ids":[5]},
                {"id":2,"name":"Bo","email":[{"value":"bo@x.com"}]}],
               "additional_data":{"pagination":{"more_items_in_collection":false}}}"#
        }
        _ => r#"{"success":true,"data":{"id":1}}"#,
    }
}

fn config(base_url: &str, request_delay: Duration) -> ApiConfig {
    ApiConfig {
        api_token: ApiToken::new("test-token"),
        base_url: base_url.to_string(),
        request_delay,
        retry: RetrySettings {
            max_retries: 0,
            ..RetrySettings::default()
        },
        page_size: 500,
        http_timeout: Duration::from_secs(5),
    }
}

#[test]
fn every_tag_is_one_paced_and_counted_request() {
    let stub = Stub::start(4);
    let config = config(&stub.base_url, Duration::from_millis(200));
    let api = PacedApi::from_config(PipedriveClient::new(&config), &config);

    api.list_person_fields().expect("fields");
    let persons = api.list_persons(0, 500).expect("persons");
    assert_eq!(persons.items[0].tags, ["customer"]);
    api.add_person_tag(PersonId(1), "not in db").expect("tag 1");
    api.add_person_tag(PersonId(2), "Not In DB").expect("tag 2");

    let seen = stub.seen();
    let lines: Vec<&str> = seen.iter().map(|s| s.line.as_str()).collect();
    assert_eq!(
        lines,
        ["GET /personFields", "GET /persons", "PUT /persons/1", "PUT /persons/2"]
    );
    assert_eq!(api.requests_made(), seen.len() as u64);

    for pair in seen.windows(2) {
        let gap = pair[1].at.duration_since(pair[0].at);
        assert!(
            gap >= Duration::from_millis(150),
            "{} followed {} after {gap:?}",
            pair[1].line,
            pair[0].line
        );
    }

    // Existing labels are kept alongside the new one.
    assert!(seen[2].body.contains("[5,7]"), "got: {}", seen[2].body);
    assert!(seen[3].body.contains("[7]"), "got: {}", seen[3].body);
}

#[test]
fn retagging_a_person_does_not_duplicate_the_label() {
    let stub = Stub::start(4);
    let config = config(&stub.base_url, Duration::ZERO);
    let api = PacedApi::from_config(PipedriveClient::new(&config), &config);

    api.list_person_fields().expect("fields");
    api.list_persons(0, 500).expect("persons");
    api.add_person_tag(PersonId(2), "not in db").expect("first");
    api.add_person_tag(PersonId(2), "not in db").expect("second");

    let seen = stub.seen();
    assert_eq!(api.requests_made(), 4);
    assert!(seen[3].body.contains("[7]"), "got: {}", seen[3].body);
    assert!(!seen[3].body.contains("7,7"), "got: {}", seen[3].body);
}
