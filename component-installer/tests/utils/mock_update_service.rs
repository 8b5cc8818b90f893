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

use core::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use component_error::{Error, make_input_err};
use component_installer::update_service::{
    ComponentRegistration, ComponentUpdateService, Priority, UpdateError,
};
use tokio::sync::{Mutex, mpsc};

enum UpdateServiceCalls {
    RegisterComponent(ComponentRegistration),
    OnDemandUpdate((String, Priority)),
}

enum UpdateServiceReturns {
    RegisterComponent(Result<(), Error>),
    OnDemandUpdate(Result<(), UpdateError>),
}

/// Every async call blocks until the test answers it, so tests decide
/// exactly when registration and updates finish.
pub struct MockUpdateService {
    rx_call: Mutex<mpsc::UnboundedReceiver<UpdateServiceCalls>>,
    tx_call: mpsc::UnboundedSender<UpdateServiceCalls>,

    rx_resp: Mutex<mpsc::UnboundedReceiver<UpdateServiceReturns>>,
    tx_resp: mpsc::UnboundedSender<UpdateServiceReturns>,

    unregister_result: AtomicBool,
    unregistered: parking_lot::Mutex<Vec<String>>,
}

impl Default for MockUpdateService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpdateService {
    pub fn new() -> Self {
        let (tx_call, rx_call) = mpsc::unbounded_channel();
        let (tx_resp, rx_resp) = mpsc::unbounded_channel();
        Self {
            rx_call: Mutex::new(rx_call),
            tx_call,
            rx_resp: Mutex::new(rx_resp),
            tx_resp,
            unregister_result: AtomicBool::new(true),
            unregistered: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Waits for a `register_component` call. The call stays blocked until
    /// [`Self::respond_register_component`].
    pub async fn expect_register_component(&self) -> ComponentRegistration {
        let mut rx_call_lock = self.rx_call.lock().await;
        let UpdateServiceCalls::RegisterComponent(req) = rx_call_lock
            .recv()
            .await
            .expect("Could not receive msg in mpsc")
        else {
            panic!("Got incorrect call waiting for register_component")
        };
        req
    }

    pub fn respond_register_component(&self, result: Result<(), Error>) {
        self.tx_resp
            .send(UpdateServiceReturns::RegisterComponent(result))
            .map_err(|_| make_input_err!("Could not send request to mpsc"))
            .unwrap();
    }

    /// Waits for an `on_demand_update` call. The call stays blocked until
    /// [`Self::respond_on_demand_update`].
    pub async fn expect_on_demand_update(&self) -> (String, Priority) {
        let mut rx_call_lock = self.rx_call.lock().await;
        let UpdateServiceCalls::OnDemandUpdate(req) = rx_call_lock
            .recv()
            .await
            .expect("Could not receive msg in mpsc")
        else {
            panic!("Got incorrect call waiting for on_demand_update")
        };
        req
    }

    pub fn respond_on_demand_update(&self, result: Result<(), UpdateError>) {
        self.tx_resp
            .send(UpdateServiceReturns::OnDemandUpdate(result))
            .map_err(|_| make_input_err!("Could not send request to mpsc"))
            .unwrap();
    }

    /// Panics if any call is waiting to be expected.
    pub fn assert_no_pending_calls(&self) {
        let mut rx_call_lock = self
            .rx_call
            .try_lock()
            .expect("Call receiver is locked by a pending expect");
        assert!(
            rx_call_lock.try_recv().is_err(),
            "Unexpected call to the update service"
        );
    }

    pub fn set_unregister_result(&self, result: bool) {
        self.unregister_result.store(result, Ordering::Relaxed);
    }

    pub fn unregistered_ids(&self) -> Vec<String> {
        self.unregistered.lock().clone()
    }
}

#[async_trait]
impl ComponentUpdateService for MockUpdateService {
    async fn register_component(&self, registration: ComponentRegistration) -> Result<(), Error> {
        self.tx_call
            .send(UpdateServiceCalls::RegisterComponent(registration))
            .expect("Could not send request to mpsc");
        let mut rx_resp_lock = self.rx_resp.lock().await;
        match rx_resp_lock
            .recv()
            .await
            .expect("Could not receive msg in mpsc")
        {
            UpdateServiceReturns::RegisterComponent(result) => result,
            UpdateServiceReturns::OnDemandUpdate(_) => {
                panic!("Expected register_component return value")
            }
        }
    }

    async fn on_demand_update(&self, id: &str, priority: Priority) -> Result<(), UpdateError> {
        self.tx_call
            .send(UpdateServiceCalls::OnDemandUpdate((id.to_string(), priority)))
            .expect("Could not send request to mpsc");
        let mut rx_resp_lock = self.rx_resp.lock().await;
        match rx_resp_lock
            .recv()
            .await
            .expect("Could not receive msg in mpsc")
        {
            UpdateServiceReturns::OnDemandUpdate(result) => result,
            UpdateServiceReturns::RegisterComponent(_) => {
                panic!("Expected on_demand_update return value")
            }
        }
    }

    fn unregister_component(&self, id: &str) -> bool {
        self.unregistered.lock().push(id.to_string());
        self.unregister_result.load(Ordering::Relaxed)
    }
}
