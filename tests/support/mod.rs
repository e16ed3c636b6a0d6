use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// Minimal HTTP/1.1 stand-in for the archive and address lookup services.
pub struct StubServer {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<String>>>,
}

pub struct StubRoutes {
    /// Snapshot body served for every `time` bucket; `None` answers 404.
    pub snapshot: Option<String>,
    /// Per-bucket overrides of `snapshot`.
    pub by_bucket: BTreeMap<String, String>,
    pub lookup: String,
}

fn query_param(target: &str, key: &str) -> Option<String> {
    let (_, query) = target.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body.as_bytes());
    let _ = stream.flush();
}

fn handle(mut stream: TcpStream, routes: &StubRoutes, requests: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    let _ = reader.read_exact(&mut body);

    let target = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    requests.lock().expect("requests").push(target.clone());

    if target.starts_with("/archive") {
        let bucket = query_param(&target, "time").unwrap_or_default();
        match routes
            .by_bucket
            .get(&bucket)
            .or(routes.snapshot.as_ref())
        {
            Some(xml) => respond(&mut stream, "200 OK", xml),
            None => respond(&mut stream, "404 Not Found", "<error/>"),
        }
    } else if target.starts_with("/lookup") {
        respond(&mut stream, "200 OK", &routes.lookup);
    } else {
        respond(&mut stream, "404 Not Found", "");
    }
}

pub fn start(routes: StubRoutes) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let base_url = format!("http://{}", listener.local_addr().expect("addr"));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            handle(stream, &routes, &seen);
        }
    });
    StubServer { base_url, requests }
}

pub const LOOKUP_RESPONSE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<AddressLookupResult><SuggestedAddress><Address><PremisesAddress><ChiPremisesAddress>\
<ChiDistrict><DcDistrict>油尖旺區</DcDistrict></ChiDistrict></ChiPremisesAddress>\
</PremisesAddress></Address></SuggestedAddress></AddressLookupResult>";

pub fn snapshot(messages: &[(&str, &str)]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<list>\n");
    for (id, announced) in messages {
        xml.push_str(&format!(
            "<message><INCIDENT_NUMBER>{id}</INCIDENT_NUMBER>\
             <INCIDENT_HEADING_EN>Traffic Accident</INCIDENT_HEADING_EN>\
             <INCIDENT_STATUS_EN>NEW</INCIDENT_STATUS_EN>\
             <INCIDENT_STATUS_CN>新</INCIDENT_STATUS_CN>\
             <ID>{id}-{announced}</ID>\
             <CONTENT_EN>Lane closed</CONTENT_EN>\
             <CONTENT_CN>行車線封閉</CONTENT_CN>\
             <LOCATION_CN>彌敦道</LOCATION_CN>\
             <NEAR_LANDMARK_CN></NEAR_LANDMARK_CN>\
             <ANNOUNCEMENT_DATE>{announced}</ANNOUNCEMENT_DATE></message>\n"
        ));
    }
    xml.push_str("</list>\n");
    xml
}
