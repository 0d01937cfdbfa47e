use log::info;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use reqwest::blocking::Client;
use snafu::ResultExt;

use crate::bagit::consts::*;
use crate::bagit::error::*;
use crate::bagit::io::delete_file_quietly;

/// A single resource to retrieve and the file it lands in. When `size` is
/// known, the transfer is aborted as soon as the received byte count
/// exceeds the declared size by more than the overage factor.
#[derive(Debug)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    pub size: Option<u64>,
}

/// Retrieves fetch resources over HTTP. Transfers run on up to
/// `MAX_CONCURRENT_DOWNLOADS` native threads; the client itself is shared.
#[derive(Debug)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Downloads a single resource to its destination, creating intermediate
    /// directories as needed. The destination file is exclusively locked for
    /// the duration of the write, and partial files are removed on failure.
    pub fn fetch_one(&self, request: &DownloadRequest) -> Result<()> {
        info!(
            "Fetching {} to {}",
            request.url,
            request.destination.display()
        );

        let mut response = self
            .client
            .get(&request.url)
            .send()
            .map_err(|e| fetch_failed(&request.url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_failed(
                &request.url,
                format!("HTTP status {}", response.status()),
            ));
        }

        if let Some(parent) = request.destination.parent() {
            fs::create_dir_all(parent).context(IoCreateSnafu { path: parent })?;
        }

        let result = self.write_body(request, &mut response);

        if result.is_err() {
            // Never leave a partial download behind
            let _ = delete_file_quietly(&request.destination);
        }

        result
    }

    fn write_body<R: Read>(&self, request: &DownloadRequest, body: &mut R) -> Result<()> {
        let destination = &request.destination;
        let limit = request
            .size
            .map(|size| (size as f64 * DOWNLOAD_OVERAGE_FACTOR) as u64);

        let mut file = File::create(destination).context(IoCreateSnafu { path: destination })?;
        file.lock_exclusive()
            .context(IoWriteSnafu { path: destination })?;

        let mut buf = [0; BUF_SIZE];
        let mut received: u64 = 0;

        loop {
            let read = body
                .read(&mut buf)
                .map_err(|e| fetch_failed(&request.url, e.to_string()))?;

            if read == 0 {
                break;
            }

            received += read as u64;

            if let Some(limit) = limit {
                if received > limit {
                    return Err(fetch_failed(
                        &request.url,
                        format!(
                            "fetched size exceeds the declared size of {} bytes",
                            request.size.unwrap()
                        ),
                    ));
                }
            }

            file.write_all(&buf[..read])
                .context(IoWriteSnafu { path: destination })?;
        }

        Ok(())
    }

    /// Downloads a batch of resources with bounded parallelism. Every request
    /// produces a result; failures do not abort the other transfers.
    pub fn fetch_many(&self, requests: Vec<DownloadRequest>) -> Vec<(DownloadRequest, Result<()>)> {
        if requests.is_empty() {
            return Vec::new();
        }

        let workers = MAX_CONCURRENT_DOWNLOADS.min(requests.len());
        let queue = Mutex::new(requests.into_iter().collect::<VecDeque<_>>());
        let results = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let request = queue.lock().unwrap().pop_front();
                    match request {
                        Some(request) => {
                            let result = self.fetch_one(&request);
                            results.lock().unwrap().push((request, result));
                        }
                        None => break,
                    }
                });
            }
        });

        results.into_inner().unwrap()
    }
}

fn fetch_failed(url: &str, details: String) -> Error {
    Error::FetchFailed {
        url: url.into(),
        details,
    }
}
