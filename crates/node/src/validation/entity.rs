use alloy_primitives::Address;
use chorus_primitives::{
    transaction::{EntityAction, ManageEntity, TrackPlays},
    wallet_string,
};
use chorus_storage::{
    Queries,
    models::{Entity, Play},
};

use super::{BlockContext, BlockEffects, ValidationError};
use crate::events::{Event, play_topic};

pub(super) fn validate(signer: &Address, entity: &ManageEntity) -> Result<(), ValidationError> {
    if entity.parsed_action().is_none() {
        return Err(ValidationError::UnknownAction(entity.action.clone()));
    }
    let wallet = wallet_string(signer);
    if !entity.signer.eq_ignore_ascii_case(&wallet) {
        return Err(ValidationError::SignerMismatch {
            expected: entity.signer.clone(),
            actual: wallet,
        });
    }
    Ok(())
}

pub(super) async fn finalize(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    tx_hash: &str,
    entity: &ManageEntity,
) -> eyre::Result<()> {
    let action = entity
        .parsed_action()
        .ok_or_else(|| eyre::eyre!("unknown entity action `{}`", entity.action))?;
    q.upsert_entity(&Entity {
        entity_type: entity.entity_type.clone(),
        entity_id: entity.entity_id,
        user_id: entity.user_id,
        action: action.as_str().to_string(),
        metadata: entity.metadata.clone(),
        signer: entity.signer.clone(),
        nonce: entity.nonce.clone(),
        deleted: action == EntityAction::Delete,
        tx_hash: tx_hash.to_string(),
        block_height: ctx.height,
    })
    .await
}

pub(super) async fn finalize_plays(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    tx_hash: &str,
    plays: &TrackPlays,
    effects: &mut BlockEffects,
) -> eyre::Result<()> {
    for (index, play) in plays.plays.iter().enumerate() {
        q.insert_play(&Play {
            tx_hash: tx_hash.to_string(),
            play_index: index as u32,
            user_id: play.user_id.clone(),
            track_id: play.track_id.clone(),
            played_at: play.timestamp,
            signature: play.signature.clone(),
            city: play.city.clone(),
            region: play.region.clone(),
            country: play.country.clone(),
            block_height: ctx.height,
        })
        .await?;
        effects.publish(
            play_topic(&play.track_id),
            Event::Play {
                tx_hash: tx_hash.to_string(),
                track_id: play.track_id.clone(),
                user_id: play.user_id.clone(),
                height: ctx.height,
            },
        );
    }
    Ok(())
}
