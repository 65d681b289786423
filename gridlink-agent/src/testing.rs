//! Test doubles shared by the scheduler tests

use gridlink_client::{
    HttpRequest, Phase, RequestHandle, Result, Transport, TransportError, TransportPoll,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Script {
    next_id: u64,
    responses: VecDeque<Result<Vec<u8>>>,
    in_flight: HashMap<RequestHandle, (u32, Result<Vec<u8>>)>,
    started: Vec<HttpRequest>,
    abandoned: Vec<RequestHandle>,
}

/// Transport that answers requests from a queue, each after
/// `pending_polls` polls
pub struct ScriptedTransport {
    pending_polls: u32,
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new(pending_polls: u32) -> Arc<Self> {
        Arc::new(Self {
            pending_polls,
            script: Mutex::new(Script::default()),
        })
    }

    /// Queues the response for the next request started
    pub fn respond(&self, response: Result<&str>) {
        self.script
            .lock()
            .unwrap()
            .responses
            .push_back(response.map(|body| body.as_bytes().to_vec()));
    }

    pub fn started(&self) -> Vec<HttpRequest> {
        self.script.lock().unwrap().started.clone()
    }

    pub fn abandoned(&self) -> Vec<RequestHandle> {
        self.script.lock().unwrap().abandoned.clone()
    }
}

impl Transport for ScriptedTransport {
    fn start(&self, request: HttpRequest) -> Result<RequestHandle> {
        let mut script = self.script.lock().unwrap();
        script.next_id += 1;
        let handle = RequestHandle(script.next_id);
        let response = script
            .responses
            .pop_front()
            .expect("request started with no scripted response");
        script
            .in_flight
            .insert(handle, (self.pending_polls, response));
        script.started.push(request);
        Ok(handle)
    }

    fn poll(&self, handle: RequestHandle) -> TransportPoll {
        let mut script = self.script.lock().unwrap();
        match script.in_flight.get_mut(&handle) {
            None => TransportPoll::Done(Err(TransportError::UnknownRequest(handle.0))),
            Some((remaining, _)) if *remaining > 0 => {
                *remaining -= 1;
                TransportPoll::Pending(Phase::Receiving)
            }
            Some(_) => {
                let (_, response) = script.in_flight.remove(&handle).unwrap();
                TransportPoll::Done(response)
            }
        }
    }

    fn abandon(&self, handle: RequestHandle) {
        let mut script = self.script.lock().unwrap();
        script.in_flight.remove(&handle);
        script.abandoned.push(handle);
    }
}
