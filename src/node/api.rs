// HTTP API - The node's JSON endpoints
//
// Paths keep their trailing slash; peers and the voting front end call them
// exactly as written here.

use crate::ledger::{Admission, Block, LedgerError, MineOutcome, PoolError, Transaction};
use crate::node::service::{NodeError, Validity, VoteNode};
use crate::sync::{ConsensusError, NewTransaction, NodeRegistration, PeerError, SyncOutcome};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Build the router for a node
pub fn router(node: Arc<VoteNode>) -> Router {
    Router::new()
        .route("/new_transaction/", post(new_transaction))
        .route("/chain/", get(get_chain))
        .route("/mine_block/", get(mine_block))
        .route("/register_node/", post(register_node))
        .route("/register_with/", post(register_with))
        .route("/add_block/", post(add_block))
        .route("/pending_transactions/", get(pending_transactions))
        .route("/chain_validity/", get(chain_validity))
        .route("/sync_with_honest_nodes/", get(sync_with_honest_nodes))
        .with_state(node)
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match &self {
            NodeError::Ledger(LedgerError::Validation(_)) | NodeError::Peer(PeerError::InvalidAddress(_)) => {
                StatusCode::BAD_REQUEST
            }
            NodeError::Ledger(LedgerError::Pool(PoolError::DuplicateVote { .. })) => StatusCode::CONFLICT,
            NodeError::Ledger(LedgerError::MiningCancelled) | NodeError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            NodeError::Peer(_)
            | NodeError::Consensus(ConsensusError::Peer(_))
            | NodeError::Consensus(ConsensusError::Ledger(LedgerError::InvalidChain)) => {
                StatusCode::BAD_GATEWAY
            }
            NodeError::Consensus(ConsensusError::NoPeers) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
        }
        message(status, self.to_string())
    }
}

async fn new_transaction(
    State(node): State<Arc<VoteNode>>,
    Json(body): Json<NewTransaction>,
) -> Result<Response, NodeError> {
    let tx = node.submit_transaction(&body.candidate, &body.voter_hash)?;
    Ok((StatusCode::CREATED, Json(tx)).into_response())
}

async fn get_chain(State(node): State<Arc<VoteNode>>) -> Result<Response, NodeError> {
    Ok(Json(node.get_chain()?).into_response())
}

async fn mine_block(State(node): State<Arc<VoteNode>>) -> Result<Response, NodeError> {
    let response = match node.mine().await? {
        MineOutcome::Mined { index, blocks } => (
            StatusCode::CREATED,
            Json(json!({
                "message": format!("Block #{} is mined", index),
                "index": index,
                "blocks": blocks.len(),
            })),
        )
            .into_response(),
        MineOutcome::NothingPending => message(StatusCode::NOT_FOUND, "No transactions in queue to mine"),
        MineOutcome::AlreadyMining => message(StatusCode::CONFLICT, "Mining already in progress"),
    };
    Ok(response)
}

async fn register_node(
    State(node): State<Arc<VoteNode>>,
    Json(body): Json<NodeRegistration>,
) -> Result<Response, NodeError> {
    let snapshot = node.register_peer(&body.node_address)?;
    Ok(Json(snapshot).into_response())
}

async fn register_with(
    State(node): State<Arc<VoteNode>>,
    Json(body): Json<NodeRegistration>,
) -> Result<Response, NodeError> {
    let length = node.register_with(&body.node_address).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Registration successful", "length": length })),
    )
        .into_response())
}

async fn add_block(State(node): State<Arc<VoteNode>>, Json(block): Json<Block>) -> Result<Response, NodeError> {
    let response = match node.add_block(block)? {
        Admission::Accepted { index } => (
            StatusCode::CREATED,
            Json(json!({ "message": "Block added to the chain", "index": index })),
        )
            .into_response(),
        Admission::Rejected(reason) => message(
            StatusCode::BAD_REQUEST,
            format!("The block was discarded by the node: {}", reason),
        ),
    };
    Ok(response)
}

async fn pending_transactions(State(node): State<Arc<VoteNode>>) -> Json<Vec<Transaction>> {
    Json(node.pending_transactions())
}

async fn chain_validity(State(node): State<Arc<VoteNode>>) -> Result<Response, NodeError> {
    let response = match node.check_validity()? {
        Validity::Valid => message(StatusCode::OK, "Votes are not tampered"),
        Validity::Tampered => message(StatusCode::BAD_REQUEST, "Votes are tampered"),
    };
    Ok(response)
}

async fn sync_with_honest_nodes(State(node): State<Arc<VoteNode>>) -> Result<Response, NodeError> {
    let (replaced, length) = match node.sync_with_peers().await? {
        SyncOutcome::Replaced { length } => (true, length),
        SyncOutcome::Unchanged { length } => (false, length),
    };
    Ok(Json(json!({ "replaced": replaced, "length": length })).into_response())
}
