//! Asynchronous mask loading
//!
//! Decoding happens on a dedicated worker thread so a slow disk or a
//! large PNG never stalls the event loop. Each request gets exactly one
//! reply; a failed decode replies `None` rather than raising, and the
//! session then treats the mask as absent until the next switch.

use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};

use crate::mask::MaskImage;

/// Reply channel for one load request
pub type LoadReply = Receiver<Option<MaskImage>>;

struct LoadRequest {
    path: PathBuf,
    reply: Sender<Option<MaskImage>>,
}

/// Seam for the frame loop; lets tests stand in a scripted loader
pub trait LoadMasks {
    fn request(&self, path: PathBuf) -> LoadReply;
}

/// Worker-thread mask loader
pub struct MaskLoader {
    request_sender: Option<Sender<LoadRequest>>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl MaskLoader {
    pub fn new() -> Result<Self, String> {
        let (request_sender, request_receiver) = crossbeam_channel::unbounded::<LoadRequest>();

        let thread_handle = std::thread::Builder::new()
            .name("mask-loader".to_string())
            .spawn(move || Self::loader_thread(request_receiver))
            .map_err(|e| format!("Failed to spawn loader thread: {}", e))?;

        Ok(Self {
            request_sender: Some(request_sender),
            thread_handle: Some(thread_handle),
        })
    }

    fn loader_thread(requests: Receiver<LoadRequest>) {
        log::info!("Mask loader thread started");

        while let Ok(request) = requests.recv() {
            let loaded = match image::open(&request.path) {
                Ok(img) => {
                    let rgba = img.into_rgba8();
                    let (width, height) = rgba.dimensions();
                    log::info!("Loaded mask {:?} ({}x{})", request.path, width, height);
                    Some(MaskImage {
                        pixels: rgba.into_raw(),
                        width,
                        height,
                    })
                }
                Err(e) => {
                    log::warn!("Failed to load mask {:?}: {}", request.path, e);
                    None
                }
            };
            // The session may have been dropped; nothing to do then
            let _ = request.reply.send(loaded);
        }

        log::info!("Mask loader thread stopped");
    }

    pub fn stop(&mut self) {
        self.request_sender = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl LoadMasks for MaskLoader {
    fn request(&self, path: PathBuf) -> LoadReply {
        let (reply_sender, reply_receiver) = crossbeam_channel::bounded(1);
        match &self.request_sender {
            Some(sender) => {
                if sender
                    .send(LoadRequest {
                        path,
                        reply: reply_sender,
                    })
                    .is_err()
                {
                    log::warn!("Mask loader thread is gone; treating load as failed");
                }
            }
            None => {
                // Stopped loader: resolve immediately as a failed load
                let _ = reply_sender.send(None);
            }
        }
        reply_receiver
    }
}

impl Drop for MaskLoader {
    fn drop(&mut self) {
        self.stop();
    }
}
