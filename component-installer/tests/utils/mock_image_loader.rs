// Copyright 2024 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use component_error::make_input_err;
use component_installer::image_loader::ImageLoader;
use tokio::sync::{Mutex, mpsc};

enum ImageLoaderCalls {
    LoadComponentAtPath((String, PathBuf)),
    UnmountComponent(String),
}

enum ImageLoaderReturns {
    LoadComponentAtPath(Option<PathBuf>),
    UnmountComponent(Option<bool>),
}

pub struct MockImageLoader {
    rx_call: Mutex<mpsc::UnboundedReceiver<ImageLoaderCalls>>,
    tx_call: mpsc::UnboundedSender<ImageLoaderCalls>,

    rx_resp: Mutex<mpsc::UnboundedReceiver<ImageLoaderReturns>>,
    tx_resp: mpsc::UnboundedSender<ImageLoaderReturns>,
}

impl Default for MockImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImageLoader {
    pub fn new() -> Self {
        let (tx_call, rx_call) = mpsc::unbounded_channel();
        let (tx_resp, rx_resp) = mpsc::unbounded_channel();
        Self {
            rx_call: Mutex::new(rx_call),
            tx_call,
            rx_resp: Mutex::new(rx_resp),
            tx_resp,
        }
    }

    /// Waits for a mount request without answering it.
    pub async fn expect_load_component_at_path(&self) -> (String, PathBuf) {
        let mut rx_call_lock = self.rx_call.lock().await;
        let ImageLoaderCalls::LoadComponentAtPath(req) = rx_call_lock
            .recv()
            .await
            .expect("Could not receive msg in mpsc")
        else {
            panic!("Got incorrect call waiting for load_component_at_path")
        };
        req
    }

    pub fn respond_load_component_at_path(&self, result: Option<PathBuf>) {
        self.tx_resp
            .send(ImageLoaderReturns::LoadComponentAtPath(result))
            .map_err(|_| make_input_err!("Could not send request to mpsc"))
            .unwrap();
    }

    pub async fn expect_unmount_component(&self, result: Option<bool>) -> String {
        let mut rx_call_lock = self.rx_call.lock().await;
        let ImageLoaderCalls::UnmountComponent(req) = rx_call_lock
            .recv()
            .await
            .expect("Could not receive msg in mpsc")
        else {
            panic!("Got incorrect call waiting for unmount_component")
        };
        self.tx_resp
            .send(ImageLoaderReturns::UnmountComponent(result))
            .map_err(|_| make_input_err!("Could not send request to mpsc"))
            .unwrap();
        req
    }

    /// Panics if any call is waiting to be expected.
    pub fn assert_no_pending_calls(&self) {
        let mut rx_call_lock = self
            .rx_call
            .try_lock()
            .expect("Call receiver is locked by a pending expect");
        assert!(
            rx_call_lock.try_recv().is_err(),
            "Unexpected call to the image loader"
        );
    }
}

#[async_trait]
impl ImageLoader for MockImageLoader {
    async fn load_component_at_path(&self, name: &str, path: &Path) -> Option<PathBuf> {
        self.tx_call
            .send(ImageLoaderCalls::LoadComponentAtPath((
                name.to_string(),
                path.to_path_buf(),
            )))
            .expect("Could not send request to mpsc");
        let mut rx_resp_lock = self.rx_resp.lock().await;
        match rx_resp_lock
            .recv()
            .await
            .expect("Could not receive msg in mpsc")
        {
            ImageLoaderReturns::LoadComponentAtPath(result) => result,
            ImageLoaderReturns::UnmountComponent(_) => {
                panic!("Expected load_component_at_path return value")
            }
        }
    }

    async fn unmount_component(&self, name: &str) -> Option<bool> {
        self.tx_call
            .send(ImageLoaderCalls::UnmountComponent(name.to_string()))
            .expect("Could not send request to mpsc");
        let mut rx_resp_lock = self.rx_resp.lock().await;
        match rx_resp_lock
            .recv()
            .await
            .expect("Could not receive msg in mpsc")
        {
            ImageLoaderReturns::UnmountComponent(result) => result,
            ImageLoaderReturns::LoadComponentAtPath(_) => {
                panic!("Expected unmount_component return value")
            }
        }
    }
}
