// Copyright 2026 the skiff authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single GET round-trip client: `client <host> [path] [port]`.

use std::io::Write;

use skiff::{CloseCode, Config, Endpoint, Handler, Host, HttpId, Message, OwnedMessage};

#[derive(Default)]
struct OneShot {
    conn: Option<HttpId>,
    path: String,
    hostname: String,
    done: bool,
    failed: bool,
}

impl Handler for OneShot {
    fn on_established(&mut self, ep: &mut Endpoint, conn: HttpId) {
        if Some(conn) != self.conn {
            return;
        }
        let msg = OwnedMessage {
            url: Some(self.path.clone()),
            host: Some(self.hostname.clone()),
            user_agent: Some("skiff-client/0.1".to_string()),
            accept_encoding: Some("gzip".to_string()),
            connection_close: true,
            ..Default::default()
        };
        if let Err(e) = ep.request(conn, &msg) {
            eprintln!("request failed: {}", e);
            self.failed = true;
        }
    }

    fn on_response(&mut self, _ep: &mut Endpoint, _conn: HttpId, msg: &Message<'_>) {
        eprintln!("status: {}", msg.status_code);
        std::io::stdout()
            .write_all(msg.payload())
            .expect("writing body");
        self.done = true;
    }

    fn on_close(&mut self, _ep: &mut Endpoint, conn: HttpId, code: CloseCode) {
        if Some(conn) == self.conn && !self.done {
            eprintln!("closed before response: {}", code);
            self.failed = true;
        }
    }
}

fn main() -> skiff::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let hostname = args.next().unwrap_or_else(|| {
        eprintln!("usage: client <host> [path] [port]");
        std::process::exit(1);
    });
    let path = args.next().unwrap_or_else(|| "/".to_string());
    let port: u16 = args
        .next()
        .map(|p| p.parse().expect("port wants a number"))
        .unwrap_or(80);

    let mut host = Host::new(hostname.clone(), port, false);
    host.resolve()?;

    let mut ep = Endpoint::new(Config::default())?;
    let mut driver = OneShot {
        path,
        hostname,
        ..Default::default()
    };
    driver.conn = Some(ep.connect(&host)?);

    while !driver.done && !driver.failed {
        ep.poll(&mut driver)?;
    }
    std::process::exit(if driver.failed { 1 } else { 0 });
}
