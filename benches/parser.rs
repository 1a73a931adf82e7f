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

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use skiff::parser::{FeedResult, ReadState, Role};

const REQUEST: &[u8] = b"GET /wp-content/uploads/2010/03/hello-kitty-darth-vader-pink.jpg HTTP/1.1\r\n\
Host: www.kittyhell.com\r\n\
User-Agent: Mozilla/5.0 (Macintosh; U; Intel Mac OS X 10.6; ja-JP-mac; rv:1.9.2.3) Gecko/20100401 Firefox/3.6.3\r\n\
Accept-Encoding: gzip,deflate\r\n\
Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
Accept-Language: ja,en-us;q=0.7,en;q=0.3\r\n\
Accept-Charset: Shift_JIS,utf-8;q=0.7,*;q=0.7\r\n\
Keep-Alive: 115\r\n\
Cookie: wp_ozh_wsa_visits=2; wp_ozh_wsa_visit_lasttime=xxxxxxxxxx\r\n\r\n";

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Length: 11\r\n\
Connection: keep-alive\r\n\
Server: example\r\n\
X-Cache: HIT\r\n\r\nhello world";

const CHUNKED: &[u8] = b"HTTP/1.1 200 OK\r\n\
Transfer-Encoding: chunked\r\n\r\n\
7\r\nhello, \r\n6\r\nworld!\r\n0\r\n\r\n";

fn parse(role: Role, bytes: &[u8]) {
    let mut state = ReadState::new(role);
    match state.feed(bytes, false).unwrap() {
        FeedResult::Complete(n) => {
            let msg = state.resolve(&bytes[..n]).unwrap();
            black_box(msg.payload().len());
        }
        FeedResult::NeedMore => panic!("incomplete"),
    }
}

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");

    group.throughput(Throughput::Bytes(REQUEST.len() as u64));
    group.bench_function("request", |b| {
        b.iter(|| parse(Role::Server, black_box(REQUEST)))
    });

    group.throughput(Throughput::Bytes(RESPONSE.len() as u64));
    group.bench_function("response", |b| {
        b.iter(|| parse(Role::Client, black_box(RESPONSE)))
    });

    group.throughput(Throughput::Bytes(CHUNKED.len() as u64));
    group.bench_function("chunked", |b| {
        b.iter(|| parse(Role::Client, black_box(CHUNKED)))
    });

    group.finish();
}

criterion_group!(benches, bench_parser);
criterion_main!(benches);
