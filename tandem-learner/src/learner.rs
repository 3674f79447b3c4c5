//! The message-driven learner actor.
//!
//! One learner exists per training task. Its whole life is
//! [`Learner::advance`]: the transport calls it with inbound wire messages,
//! and local follow-up steps re-enter it through messages posted on spawned
//! tasks, so a wire handler never blocks on the remainder of a round.
//!
//! State transitions that read-then-write the status, the round counter or
//! the process acquire the learner's lock for exactly the check-and-update
//! window; the lock is never held across a call to the peer. Wire messages
//! outside the accepted round window are dropped silently, which makes the
//! inbound handlers safe under duplicate delivery.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tandem_core::{
    common::{Algorithm, TaskResult, TrainParams, TrainRequest},
    crypto::{PaillierKeyPair, DEFAULT_MODULUS_BITS},
    message::{FromBytes, Message, Payload, Tag, ToBytes},
};

use crate::{
    error::Error,
    process::Process,
    psi::TwoPartyPsi,
    traits::{ResultHandler, RpcHandler},
};

const SEND_ATTEMPTS: u32 = 3;

/// Protocol progress of a learner. Advances monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    StartPsi,
    EndPsi,
    StartTrain,
    EndTrain,
}

/// The state guarded by the learner's lock.
struct Inner {
    status: Status,
    loop_round: u64,
    psi: TwoPartyPsi,
    process: Process,
    aligned_rows: Option<Vec<Vec<String>>>,
}

/// A vertical logistic regression learner.
///
/// Created once per task with [`Learner::new`], which immediately kicks off
/// the set intersection; from then on the learner drives itself through
/// self-posted messages and the peer's inbound calls until it reports its
/// result exactly once through the [`ResultHandler`].
pub struct Learner {
    id: String,
    algo: Algorithm,
    address: String,
    peer: String,
    /// Our homomorphic public key, serialized for transmission.
    homo_pub: Vec<u8>,
    rpc: Arc<dyn RpcHandler>,
    results: Arc<dyn ResultHandler>,
    inner: Mutex<Inner>,
    /// Write-once flag covering the result port.
    reported: AtomicBool,
}

impl Learner {
    /// Creates a learner and asynchronously begins the set intersection.
    ///
    /// Must be called within a tokio runtime. `samples` is the raw content
    /// of this party's CSV sample file.
    pub fn new(
        id: &str,
        address: &str,
        params: TrainParams,
        samples: &[u8],
        peer: &str,
        rpc: Arc<dyn RpcHandler>,
        results: Arc<dyn ResultHandler>,
    ) -> Result<Arc<Self>, Error> {
        let learner = Self::build(id, address, params, samples, peer, rpc, results)?;
        learner.post(Message::psi_enc());
        Ok(learner)
    }

    fn build(
        id: &str,
        address: &str,
        params: TrainParams,
        samples: &[u8],
        peer: &str,
        rpc: Arc<dyn RpcHandler>,
        results: Arc<dyn ResultHandler>,
    ) -> Result<Arc<Self>, Error> {
        params.validate()?;
        let psi = TwoPartyPsi::new(address, samples, &params.id_name, peer)?;
        let bits = if params.key_bits == 0 {
            DEFAULT_MODULUS_BITS
        } else {
            params.key_bits
        };
        let keys = PaillierKeyPair::generate(bits);
        let homo_pub = keys.public.to_bytes();
        let process = Process::new(address, keys, params);
        Ok(Arc::new(Self {
            id: id.to_string(),
            algo: Algorithm::LogicRegressionVl,
            address: address.to_string(),
            peer: peer.to_string(),
            homo_pub,
            rpc,
            results,
            inner: Mutex::new(Inner {
                status: Status::StartPsi,
                loop_round: 0,
                psi,
                process,
                aligned_rows: None,
            }),
            reported: AtomicBool::new(false),
        }))
    }

    /// Feeds one serialized message into the state machine and returns the
    /// response payload for the caller, if the message warrants one.
    pub async fn advance(self: &Arc<Self>, payload: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let message = Message::from_byte_slice(payload).map_err(Error::Decode)?;
        self.dispatch(message).await
    }

    async fn dispatch(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let tag = message.header.tag;
        let round = message.header.round;
        let result = self.handle(message).await;
        match &result {
            Ok(_) => debug!(party = %self.address, ?tag, round, "finished advance"),
            Err(err) => self.fail(err),
        }
        result
    }

    async fn handle(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let round = message.header.round;
        match message.header.tag {
            Tag::PsiEnc => self.psi_enc().await,
            Tag::PsiAskReEnc => self.psi_ask_re_enc(message).await,
            Tag::PsiReEnc => self.psi_re_enc(message).await,
            Tag::PsiIntersect => self.psi_intersect().await,
            Tag::TrainHup => self.train_hup().await,
            Tag::HomoPubkey => self.homo_pubkey(message).await,
            Tag::TrainLoop => self.train_loop(round).await,
            Tag::TrainCalLocalGradCost => self.train_cal_local_grad_cost(round).await,
            Tag::TrainPartBytes => self.train_part_bytes(message).await,
            Tag::TrainCalEncGradCost => self.train_cal_enc_grad_cost(round).await,
            Tag::TrainEncGradCost => self.train_enc_grad_cost(message).await,
            Tag::TrainDecLocalGradCost => self.train_dec_local_grad_cost(round).await,
            Tag::TrainGradAndCost => self.train_grad_and_cost(message).await,
            Tag::TrainUpdCostGrad => self.train_upd_cost_grad(round).await,
            Tag::TrainStatus => self.train_status(message).await,
            Tag::TrainCheckStatus => self.train_check_status(round).await,
            Tag::TrainModels => self.train_models(round).await,
        }
    }

    /// Blinds the local sample ids and hands them to the re-encryption step.
    async fn psi_enc(self: &Arc<Self>) -> Result<Option<Vec<u8>>, Error> {
        let enc_ids = {
            let mut inner = self.inner.lock().await;
            inner.psi.encrypt_sample_id_set()?
        };
        self.post(Message::psi_ask_re_enc(enc_ids));
        Ok(None)
    }

    /// Sends our blinded ids to the peer and consumes its doubly-blinded
    /// answer.
    async fn psi_ask_re_enc(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let enc_ids = match message.payload {
            Payload::ReEnc(re_enc) => re_enc.enc_ids,
            _ => return Err(Error::internal("psi ask message without an id set")),
        };
        let round = self.inner.lock().await.loop_round;
        let response = self
            .send_with_retry(Message::psi_re_enc_request(enc_ids, round))
            .await?
            .ok_or_else(|| Error::internal("empty response to a re-encryption request"))?;
        let re_enc_ids = match response.payload {
            Payload::ReEnc(re_enc) => re_enc.re_enc_ids,
            _ => return Err(Error::internal("unexpected re-encryption response payload")),
        };
        let done = {
            let mut inner = self.inner.lock().await;
            inner.psi.set_re_encrypt_id_set(&self.peer, &re_enc_ids)?
        };
        if done {
            self.post(Message::psi_intersect());
        }
        Ok(None)
    }

    /// Answers the peer's re-encryption request and stashes the
    /// doubly-blinded set we produced for it.
    async fn psi_re_enc(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let from = message.header.from;
        let enc_ids = match message.payload {
            Payload::ReEnc(re_enc) => re_enc.enc_ids,
            _ => return Err(Error::internal("psi re-encryption request without an id set")),
        };
        let (re_enc_ids, stashed) = {
            let mut inner = self.inner.lock().await;
            let re_enc_ids = inner.psi.re_encrypt_id_set(&from, &enc_ids)?;
            let stashed = inner
                .psi
                .set_other_final_re_encrypt_id_set(&from, &re_enc_ids);
            (re_enc_ids, stashed)
        };

        let mut response = Message::psi_re_enc_response(re_enc_ids);
        response.header.from = self.address.clone();
        response.header.to = from;
        let payload = response.to_vec();

        // the answer goes back to the peer even if our own bookkeeping
        // failed; the failure is reported through the result port
        match stashed {
            Ok(()) => self.post(Message::psi_intersect()),
            Err(err) => self.fail(&err),
        }
        Ok(Some(payload))
    }

    /// Attempts the intersection; on success stores the aligned rows and
    /// hands over to training.
    async fn psi_intersect(self: &Arc<Self>) -> Result<Option<Vec<u8>>, Error> {
        let done = {
            let mut inner = self.inner.lock().await;
            match inner.psi.intersect_parts()? {
                Some((rows, _)) if inner.status == Status::StartPsi => {
                    inner.aligned_rows = Some(rows);
                    inner.status = Status::EndPsi;
                    true
                }
                _ => false,
            }
        };
        if done {
            self.post(Message::train_hup());
        }
        Ok(None)
    }

    /// Initializes the training process from the aligned rows, broadcasts
    /// our homomorphic public key and enters round zero.
    async fn train_hup(self: &Arc<Self>) -> Result<Option<Vec<u8>>, Error> {
        let proceed = {
            let mut inner = self.inner.lock().await;
            if inner.status == Status::EndPsi {
                inner.status = Status::StartTrain;
                let rows = inner
                    .aligned_rows
                    .take()
                    .ok_or_else(|| Error::internal("aligned rows missing after intersection"))?;
                inner.process.init(&rows)?;
                true
            } else {
                false
            }
        };
        if proceed {
            self.send_with_retry(Message::homo_pubkey(self.homo_pub.clone(), 0))
                .await?;
            self.post(Message::train_loop(0));
        }
        Ok(None)
    }

    async fn homo_pubkey(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let key = match message.payload {
            Payload::Pubkey(pubkey) => pubkey.key,
            _ => return Err(Error::internal("pubkey message without a key")),
        };
        self.inner.lock().await.process.set_homo_pub_of_other(&key)?;
        Ok(None)
    }

    /// Starts round `round`, accepting only the initial round or the direct
    /// successor of the current one.
    async fn train_loop(self: &Arc<Self>, round: u64) -> Result<Option<Vec<u8>>, Error> {
        let proceed = {
            let mut inner = self.inner.lock().await;
            if round == 0 || round == inner.loop_round + 1 {
                inner.loop_round = round;
                inner.process.up_round(round);
                true
            } else {
                false
            }
        };
        if proceed {
            self.post(Message::train_cal_local_grad_cost(round));
        }
        Ok(None)
    }

    async fn train_cal_local_grad_cost(
        self: &Arc<Self>,
        round: u64,
    ) -> Result<Option<Vec<u8>>, Error> {
        let parts = {
            let mut inner = self.inner.lock().await;
            if round == inner.loop_round {
                inner.process.cal_local_gradient_and_cost()?
            } else {
                None
            }
        };
        if let Some(parts) = parts {
            self.send_with_retry(Message::train_part_bytes(parts, round))
                .await?;
            self.post(Message::train_cal_enc_grad_cost(round));
        }
        Ok(None)
    }

    /// Stores the peer's series for the current round or the next one;
    /// anything else is stale or too far ahead and is dropped.
    async fn train_part_bytes(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let round = message.header.round;
        let parts = match message.payload {
            Payload::PartBytes(parts) => parts.parts,
            _ => return Err(Error::internal("part bytes message without parts")),
        };
        let current = {
            let mut inner = self.inner.lock().await;
            if round == inner.loop_round || round == inner.loop_round + 1 {
                inner.process.set_part_bytes_from_other(&parts, round)?;
                round == inner.loop_round
            } else {
                debug!(
                    party = %self.address,
                    round,
                    loop_round = inner.loop_round,
                    "dropping part bytes outside the round window"
                );
                false
            }
        };
        if current {
            self.post(Message::train_cal_enc_grad_cost(round));
        }
        Ok(None)
    }

    async fn train_cal_enc_grad_cost(
        self: &Arc<Self>,
        round: u64,
    ) -> Result<Option<Vec<u8>>, Error> {
        let computed = {
            let mut inner = self.inner.lock().await;
            if round == inner.loop_round {
                inner.process.cal_enc_gradient_and_cost()?
            } else {
                None
            }
        };
        match computed {
            Some((enc_grad, enc_cost)) => {
                self.send_with_retry(Message::train_enc_grad_cost(enc_grad, enc_cost, round))
                    .await?;
            }
            // re-fired by the arrival of the peer's part bytes
            None => debug!(
                party = %self.address,
                round,
                "encrypted gradient not ready yet"
            ),
        }
        Ok(None)
    }

    async fn train_enc_grad_cost(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let round = message.header.round;
        let (enc_grad, enc_cost) = match message.payload {
            Payload::EncGradCost(enc) => (enc.enc_grad, enc.enc_cost),
            _ => return Err(Error::internal("encrypted grad/cost message without payload")),
        };
        let ready = {
            let mut inner = self.inner.lock().await;
            if round == inner.loop_round {
                inner
                    .process
                    .set_enc_gradient_and_cost_from_other(&enc_grad, &enc_cost)?
            } else {
                false
            }
        };
        if ready {
            self.post(Message::train_dec_local_grad_cost(round));
        }
        Ok(None)
    }

    async fn train_dec_local_grad_cost(
        self: &Arc<Self>,
        round: u64,
    ) -> Result<Option<Vec<u8>>, Error> {
        let decrypted = {
            let mut inner = self.inner.lock().await;
            if round == inner.loop_round {
                inner.process.dec_gradient_and_cost()?
            } else {
                None
            }
        };
        if let Some((grad_bytes, cost_bytes)) = decrypted {
            self.send_with_retry(Message::train_grad_and_cost(grad_bytes, cost_bytes, round))
                .await?;
        }
        Ok(None)
    }

    async fn train_grad_and_cost(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let round = message.header.round;
        let (grad_bytes, cost_bytes) = match message.payload {
            Payload::GradCost(plain) => (plain.grad_bytes, plain.cost_bytes),
            _ => return Err(Error::internal("grad/cost message without payload")),
        };
        let ready = {
            let mut inner = self.inner.lock().await;
            if round == inner.loop_round {
                inner
                    .process
                    .set_gradient_and_cost_from_other(&grad_bytes, &cost_bytes)?
            } else {
                false
            }
        };
        if ready {
            self.post(Message::train_upd_cost_grad(round));
        }
        Ok(None)
    }

    /// Applies the round's gradient, then exchanges stop decisions.
    async fn train_upd_cost_grad(self: &Arc<Self>, round: u64) -> Result<Option<Vec<u8>>, Error> {
        let stopped = {
            let mut inner = self.inner.lock().await;
            if round == inner.loop_round {
                Some(inner.process.update_cost_and_gradient()?)
            } else {
                None
            }
        };
        if let Some(stopped) = stopped {
            info!(party = %self.address, round, stopped, "sending stop decision to peer");
            self.send_with_retry(Message::train_status(stopped, round))
                .await?;
            self.post(Message::train_check_status(round));
        }
        Ok(None)
    }

    async fn train_status(self: &Arc<Self>, message: Message) -> Result<Option<Vec<u8>>, Error> {
        let round = message.header.round;
        let stopped = match message.payload {
            Payload::Status(status) => status.stopped,
            _ => return Err(Error::internal("status message without a decision")),
        };
        let in_round = {
            let mut inner = self.inner.lock().await;
            if round == inner.loop_round {
                inner.process.set_other_status(stopped);
                true
            } else {
                debug!(
                    party = %self.address,
                    round,
                    loop_round = inner.loop_round,
                    "dropping stale stop decision"
                );
                false
            }
        };
        if in_round {
            info!(party = %self.address, round, peer_stopped = stopped, "received peer stop decision");
            self.post(Message::train_check_status(round));
        }
        Ok(None)
    }

    /// Once both stop decisions are in: extract the model if both parties
    /// agreed, otherwise enter the next round.
    async fn train_check_status(self: &Arc<Self>, round: u64) -> Result<Option<Vec<u8>>, Error> {
        let (decided, stopped) = self.inner.lock().await.process.stop();
        if decided {
            if stopped {
                info!(party = %self.address, round, "both parties agreed to stop");
                self.post(Message::train_models(round));
            } else {
                info!(party = %self.address, round, "starting round {}", round + 1);
                self.post(Message::train_loop(round + 1));
            }
        }
        Ok(None)
    }

    /// Terminal transition: report the model through the result port.
    async fn train_models(self: &Arc<Self>, round: u64) -> Result<Option<Vec<u8>>, Error> {
        let model = {
            let mut inner = self.inner.lock().await;
            if inner.status == Status::StartTrain {
                inner.status = Status::EndTrain;
                Some(inner.process.get_train_models()?)
            } else {
                None
            }
        };
        if let Some(model) = model {
            let bytes =
                bincode::serialize(&model).map_err(|err| Error::Serialize(err.to_string()))?;
            info!(party = %self.address, round, "trained out a model");
            if !self.reported.swap(true, Ordering::SeqCst) {
                self.results.save_result(TaskResult {
                    task_id: self.id.clone(),
                    success: true,
                    model: bytes,
                    err_msg: String::new(),
                });
            }
        }
        Ok(None)
    }

    /// Re-enters the state machine with a local message on a spawned task,
    /// so the current handler returns without waiting for the follow-up.
    fn post(self: &Arc<Self>, message: Message) {
        let learner = Arc::clone(self);
        tokio::spawn(async move {
            // failures are reported through the result port by dispatch
            let _ = learner.dispatch(message).await;
        });
    }

    /// Sends a message to the peer, retrying transient transport failures.
    /// Returns the peer's response message, if it sent one.
    async fn send_with_retry(&self, mut message: Message) -> Result<Option<Message>, Error> {
        message.header.from = self.address.clone();
        message.header.to = self.peer.clone();
        let request = TrainRequest {
            task_id: self.id.clone(),
            algo: self.algo,
            payload: message.to_vec(),
        };

        let mut last = None;
        for attempt in 1..=SEND_ATTEMPTS {
            match self.rpc.step_train(request.clone(), &self.peer).await {
                Ok(response) => {
                    if response.payload.is_empty() {
                        return Ok(None);
                    }
                    let reply =
                        Message::from_byte_slice(&response.payload).map_err(Error::Decode)?;
                    return Ok(Some(reply));
                }
                Err(err) => {
                    warn!(party = %self.address, attempt, error = %err, "request to peer failed");
                    last = Some(err);
                }
            }
        }
        Err(Error::Rpc {
            attempts: SEND_ATTEMPTS,
            // the loop ran at least once, so an error is recorded
            last: last.unwrap().to_string(),
        })
    }

    /// Reports the first fatal error through the result port; later calls
    /// only log.
    fn fail(&self, err: &Error) {
        warn!(
            party = %self.address,
            kind = ?err.kind(),
            error = %err,
            "failed to train out a model"
        );
        if !self.reported.swap(true, Ordering::SeqCst) {
            self.results.save_result(TaskResult {
                task_id: self.id.clone(),
                success: false,
                model: Vec::new(),
                err_msg: err.to_string(),
            });
        }
    }

    #[cfg(test)]
    fn new_idle(
        params: TrainParams,
        samples: &[u8],
        rpc: Arc<dyn RpcHandler>,
        results: Arc<dyn ResultHandler>,
    ) -> Arc<Self> {
        Self::build("task-1", "party-a", params, samples, "party-b", rpc, results).unwrap()
    }
}
