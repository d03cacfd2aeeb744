// Path: crates/consensus/src/recovery.rs
//! Assembly of recovery responses from the current round context.
//!
//! There is no dedicated recovery-request message: a validator reveals it has
//! fallen behind by sending a change-view for a view this node has already
//! moved past, or by view-changing against a round this node has already
//! commit-locked. The response replays everything the round has collected so
//! far; each nested payload carries its own witness and is re-verified on
//! receipt.

use crate::context::RoundContext;
use crate::payload::{ConsensusMessage, ConsensusPayload, RecoveryPayloads};

/// Builds the recovery payloads for the current round.
pub fn assemble(ctx: &RoundContext) -> RecoveryPayloads {
    let prepare_request = ctx
        .candidate()
        .map(|candidate| candidate.request_payload_hash)
        .and_then(|request_hash| {
            // The primary's request is stored in its preparation slot; pick
            // it back out by payload hash so backups' responses stay in the
            // preparations section.
            ctx.preparation_payloads()
                .into_iter()
                .find(|p| matches!(p.message, ConsensusMessage::PrepareRequest { .. }) && p.hash() == request_hash)
        })
        .map(Box::new);

    let preparations = ctx
        .preparation_payloads()
        .into_iter()
        .filter(|p| matches!(p.message, ConsensusMessage::PrepareResponse { .. }))
        .collect();

    RecoveryPayloads {
        change_views: ctx.change_view_payloads(),
        prepare_request,
        preparations,
        commits: ctx.commit_payloads(),
    }
}

/// Flattens a recovery message into the replay order: change views first so
/// the receiver can reach the right view, then the request that defines the
/// candidate, then endorsements, then commits.
pub fn replay_order(payloads: RecoveryPayloads) -> Vec<ConsensusPayload> {
    let RecoveryPayloads {
        change_views,
        prepare_request,
        preparations,
        commits,
    } = payloads;
    change_views
        .into_iter()
        .chain(prepare_request.map(|boxed| *boxed))
        .chain(preparations)
        .chain(commits)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CandidateBlock;
    use meridian_types::app::BlockHeader;

    fn request_payload() -> ConsensusPayload {
        ConsensusPayload::new(
            10,
            2,
            0,
            ConsensusMessage::PrepareRequest {
                timestamp: 0,
                nonce: 1,
                transaction_hashes: vec![],
                next_consensus: vec![],
            },
        )
    }

    fn response_payload(index: u8, preparation_hash: [u8; 32]) -> ConsensusPayload {
        ConsensusPayload::new(
            10,
            index,
            0,
            ConsensusMessage::PrepareResponse { preparation_hash },
        )
    }

    #[test]
    fn assemble_splits_request_from_responses() {
        let mut ctx = RoundContext::new(4, Some(0));
        ctx.reset_for_height(10, 0);

        let request = request_payload();
        let request_hash = request.hash();
        let header = BlockHeader {
            version: 0,
            height: 10,
            prev_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            timestamp: 0,
            primary_index: 2,
            nonce: 1,
            next_consensus: vec![],
        };
        let hash = header.hash();
        ctx.set_candidate(CandidateBlock {
            header,
            hash,
            transaction_hashes: vec![],
            request_payload_hash: request_hash,
        })
        .unwrap();
        ctx.add_preparation(2, request).unwrap();
        ctx.add_preparation(0, response_payload(0, request_hash)).unwrap();
        ctx.add_preparation(1, response_payload(1, request_hash)).unwrap();

        let recovery = assemble(&ctx);
        assert!(recovery.prepare_request.is_some());
        assert_eq!(recovery.preparations.len(), 2);
        assert!(recovery.commits.is_empty());

        // Replay order: request before endorsements.
        let order = replay_order(recovery);
        assert!(matches!(
            order[0].message,
            ConsensusMessage::PrepareRequest { .. }
        ));
    }

    #[test]
    fn assemble_without_candidate_carries_only_change_views() {
        let mut ctx = RoundContext::new(4, Some(0));
        ctx.reset_for_height(10, 0);
        let cv = ConsensusPayload::new(
            10,
            1,
            0,
            ConsensusMessage::ChangeView {
                new_view_number: 1,
                timestamp: 0,
                reason: crate::payload::ChangeViewReason::Timeout,
            },
        );
        ctx.add_change_view(1, cv, 1).unwrap();
        let recovery = assemble(&ctx);
        assert!(recovery.prepare_request.is_none());
        assert_eq!(recovery.change_views.len(), 1);
        assert!(recovery.preparations.is_empty());
    }
}
