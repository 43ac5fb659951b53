//! A minimal HTTP/1.1 server that answers a scripted sequence of requests, one per connection.

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::mpsc,
    thread,
};

#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
}

impl Reply {
    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Appends a chunk to the chunked response body.
    pub fn chunk(mut self, data: impl AsRef<[u8]>) -> Self {
        self.chunks.push(data.as_ref().to_vec());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn quoted_param(params: &str, name: &str) -> Option<String> {
    params.split(';').map(str::trim).find_map(|param| {
        param
            .strip_prefix(name)?
            .strip_prefix("=\"")?
            .strip_suffix('"')
            .map(str::to_owned)
    })
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }

    /// Parses a `multipart/form-data` body.
    pub fn form_parts(&self) -> Vec<FormPart> {
        let Some(boundary) = self
            .header("content-type")
            .and_then(|value| value.split_once("boundary="))
            .map(|(_, boundary)| boundary.trim_matches('"'))
        else {
            return Vec::new();
        };
        let delimiter = format!("--{boundary}").into_bytes();

        let mut parts = Vec::new();
        let mut rest = self.body.as_slice();
        while let Some(start) = find(rest, &delimiter) {
            rest = &rest[start + delimiter.len()..];
            if rest.starts_with(b"--") {
                break;
            }
            let rest_of_part = rest.strip_prefix(b"\r\n").unwrap_or(rest);
            let Some(end) = find(rest_of_part, &delimiter) else {
                break;
            };
            let raw = &rest_of_part[..end];
            let raw = raw.strip_suffix(b"\r\n").unwrap_or(raw);
            let Some(split) = find(raw, b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&raw[..split]);
            let headers: Vec<(String, String)> = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
                .collect();
            let disposition = header(&headers, "content-disposition").unwrap_or_default();
            parts.push(FormPart {
                name: quoted_param(disposition, "name").unwrap_or_default(),
                file_name: quoted_param(disposition, "filename"),
                content_type: header(&headers, "content-type").map(str::to_owned),
                body: raw[split + 4..].to_vec(),
            });
        }
        parts
    }

    pub fn form_part(&self, name: &str) -> Option<FormPart> {
        self.form_parts().into_iter().find(|part| part.name == name)
    }
}

fn read_request(stream: &TcpStream) -> std::io::Result<Request> {
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut words = line.split_whitespace();
    let method = words.next().unwrap_or_default().to_owned();
    let path = words.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_owned(), value.trim().to_owned()));
        }
    }

    let mut body = Vec::new();
    if let Some(length) = header(&headers, "content-length").and_then(|v| v.parse::<usize>().ok())
    {
        body.resize(length, 0);
        reader.read_exact(&mut body)?;
    } else if header(&headers, "transfer-encoding")
        .is_some_and(|value| value.eq_ignore_ascii_case("chunked"))
    {
        loop {
            let mut size = String::new();
            reader.read_line(&mut size)?;
            let size = usize::from_str_radix(size.trim(), 16).unwrap_or(0);
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk)?;
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    }

    Ok(Request {
        method,
        path,
        headers,
        body,
    })
}

fn write_reply(mut stream: &TcpStream, reply: &Reply) -> std::io::Result<()> {
    write!(stream, "HTTP/1.1 {} Stub\r\n", reply.status)?;
    for (name, value) in &reply.headers {
        write!(stream, "{name}: {value}\r\n")?;
    }
    write!(stream, "Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n")?;
    stream.flush()?;
    for chunk in &reply.chunks {
        write!(stream, "{:x}\r\n", chunk.len())?;
        stream.write_all(chunk)?;
        write!(stream, "\r\n")?;
        stream.flush()?;
    }
    write!(stream, "0\r\n\r\n")?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)
}

/// Serves the given replies in order, one per accepted connection, then stops accepting.
pub struct StubServer {
    addr: SocketAddr,
    requests: mpsc::Receiver<Request>,
}

impl StubServer {
    pub fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (sender, requests) = mpsc::channel();

        thread::spawn(move || {
            for reply in replies {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let Ok(request) = read_request(&stream) else {
                    return;
                };
                // The request is recorded before the reply goes out, so once a client has its
                // response the request is visible through `requests`.
                if sender.send(request).is_err() {
                    return;
                }
                let _ = write_reply(&stream, &reply);
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The requests received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.try_iter().collect()
    }
}

/// A URL on which nothing is listening.
pub fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
