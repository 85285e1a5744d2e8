use alloy_primitives::Bytes;
use eyre::WrapErr;
use sqlx::types::Json;

use super::{Queries, from_db, to_db};
use crate::models::{Challenge, ChallengeOutcome, ChallengeStatus, ProofStatus, StoredProof};

const SELECT_CHALLENGE: &str = r#"
    SELECT block_height, block_hash, verifier_address, prover_addresses, status, outcome
    FROM pos_challenges
"#;

const SELECT_PROOF: &str = r#"
    SELECT block_height, address, cid, proof_signature, prover_addresses, encrypted_proof,
           encrypted_secret, ephemeral_public_key, status
    FROM storage_proofs
"#;

impl Queries<'_> {
    pub async fn insert_challenge(&mut self, challenge: &Challenge) -> eyre::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pos_challenges
                (block_height, block_hash, verifier_address, prover_addresses, status, outcome)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(block_height) DO NOTHING;
            "#,
        )
        .bind(to_db(challenge.height))
        .bind(&challenge.block_hash)
        .bind(&challenge.verifier_address)
        .bind(challenge.prover_addresses.as_ref().map(Json))
        .bind(challenge.status.as_str())
        .bind(challenge.outcome.map(|outcome| outcome.as_str()))
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert pos challenge")?;
        Ok(())
    }

    pub async fn challenge(&mut self, height: u64) -> eyre::Result<Option<Challenge>> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            "{SELECT_CHALLENGE} WHERE block_height = ?1;"
        ))
        .bind(to_db(height))
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch pos challenge")?;
        row.map(Challenge::try_from).transpose()
    }

    /// Challenges still waiting for proofs or a verification, oldest first.
    pub async fn open_challenges(&mut self) -> eyre::Result<Vec<Challenge>> {
        let rows = sqlx::query_as::<_, ChallengeRow>(&format!(
            "{SELECT_CHALLENGE} WHERE status IN ('open', 'proved') ORDER BY block_height;"
        ))
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch open pos challenges")?;
        rows.into_iter().map(Challenge::try_from).collect()
    }

    /// Open challenges `verifier` was assigned to.
    pub async fn open_challenges_verified_by(&mut self, verifier: &str) -> eyre::Result<Vec<Challenge>> {
        let rows = sqlx::query_as::<_, ChallengeRow>(&format!(
            "{SELECT_CHALLENGE} WHERE status IN ('open', 'proved') AND verifier_address = ?1 \
             ORDER BY block_height;"
        ))
        .bind(verifier)
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch pos challenges by verifier")?;
        rows.into_iter().map(Challenge::try_from).collect()
    }

    /// Fixes the replica set of a challenge and marks it proved. The first
    /// call wins; later calls leave the prover set untouched.
    pub async fn set_challenge_provers(&mut self, height: u64, provers: &[String]) -> eyre::Result<()> {
        sqlx::query(
            r#"
            UPDATE pos_challenges
            SET prover_addresses = COALESCE(prover_addresses, ?2),
                status = CASE WHEN status = 'open' THEN 'proved' ELSE status END
            WHERE block_height = ?1;
            "#,
        )
        .bind(to_db(height))
        .bind(Json(provers))
        .execute(&mut *self.conn)
        .await
        .wrap_err("set pos challenge provers")?;
        Ok(())
    }

    pub async fn set_challenge_status(
        &mut self,
        height: u64,
        status: ChallengeStatus,
        outcome: Option<ChallengeOutcome>,
    ) -> eyre::Result<()> {
        sqlx::query(
            r#"
            UPDATE pos_challenges SET status = ?2, outcome = ?3 WHERE block_height = ?1;
            "#,
        )
        .bind(to_db(height))
        .bind(status.as_str())
        .bind(outcome.map(|outcome| outcome.as_str()))
        .execute(&mut *self.conn)
        .await
        .wrap_err("set pos challenge status")?;
        Ok(())
    }

    /// Faults the challenge at `height` and exempts every proof filed for it.
    ///
    /// Returns the number of exempted proofs.
    pub async fn fault_challenge(&mut self, height: u64) -> eyre::Result<u64> {
        self.set_challenge_status(height, ChallengeStatus::Faulted, None)
            .await?;
        let result = sqlx::query(
            r#"
            UPDATE storage_proofs SET status = 'exempt' WHERE block_height = ?1;
            "#,
        )
        .bind(to_db(height))
        .execute(&mut *self.conn)
        .await
        .wrap_err("exempt storage proofs")?;
        Ok(result.rows_affected())
    }

    /// Deletes challenges and proofs below `height`.
    pub async fn delete_challenges_before(&mut self, height: u64) -> eyre::Result<u64> {
        sqlx::query("DELETE FROM storage_proofs WHERE block_height < ?1;")
            .bind(to_db(height))
            .execute(&mut *self.conn)
            .await
            .wrap_err("prune storage proofs")?;
        let result = sqlx::query("DELETE FROM pos_challenges WHERE block_height < ?1;")
            .bind(to_db(height))
            .execute(&mut *self.conn)
            .await
            .wrap_err("prune pos challenges")?;
        Ok(result.rows_affected())
    }

    /// Returns `false` if the prover already filed a proof for this height.
    pub async fn insert_storage_proof(&mut self, proof: &StoredProof) -> eyre::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO storage_proofs (
                block_height, address, cid, proof_signature, prover_addresses,
                encrypted_proof, encrypted_secret, ephemeral_public_key, status
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(block_height, address) DO NOTHING;
            "#,
        )
        .bind(to_db(proof.height))
        .bind(&proof.address)
        .bind(&proof.cid)
        .bind(proof.proof_signature.as_ref())
        .bind(Json(&proof.prover_addresses))
        .bind(proof.encrypted_proof.as_ref())
        .bind(proof.encrypted_secret.as_ref())
        .bind(proof.ephemeral_public_key.as_ref())
        .bind(proof.status.as_str())
        .execute(&mut *self.conn)
        .await
        .wrap_err("insert storage proof")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn storage_proofs(&mut self, height: u64) -> eyre::Result<Vec<StoredProof>> {
        let rows = sqlx::query_as::<_, ProofRow>(&format!(
            "{SELECT_PROOF} WHERE block_height = ?1 ORDER BY address;"
        ))
        .bind(to_db(height))
        .fetch_all(&mut *self.conn)
        .await
        .wrap_err("fetch storage proofs")?;
        rows.into_iter().map(StoredProof::try_from).collect()
    }

    pub async fn storage_proof(&mut self, height: u64, address: &str) -> eyre::Result<Option<StoredProof>> {
        let row = sqlx::query_as::<_, ProofRow>(&format!(
            "{SELECT_PROOF} WHERE block_height = ?1 AND address = ?2;"
        ))
        .bind(to_db(height))
        .bind(address)
        .fetch_optional(&mut *self.conn)
        .await
        .wrap_err("fetch storage proof")?;
        row.map(StoredProof::try_from).transpose()
    }

    pub async fn set_proof_status(
        &mut self,
        height: u64,
        address: &str,
        status: ProofStatus,
    ) -> eyre::Result<()> {
        sqlx::query(
            r#"
            UPDATE storage_proofs SET status = ?3 WHERE block_height = ?1 AND address = ?2;
            "#,
        )
        .bind(to_db(height))
        .bind(address)
        .bind(status.as_str())
        .execute(&mut *self.conn)
        .await
        .wrap_err("set storage proof status")?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChallengeRow {
    block_height: i64,
    block_hash: String,
    verifier_address: String,
    prover_addresses: Option<Json<Vec<String>>>,
    status: String,
    outcome: Option<String>,
}

impl TryFrom<ChallengeRow> for Challenge {
    type Error = eyre::Error;

    fn try_from(row: ChallengeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            height: from_db(row.block_height),
            block_hash: row.block_hash,
            verifier_address: row.verifier_address,
            prover_addresses: row.prover_addresses.map(|Json(provers)| provers),
            status: row.status.parse()?,
            outcome: row.outcome.as_deref().map(str::parse).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProofRow {
    block_height: i64,
    address: String,
    cid: String,
    proof_signature: Vec<u8>,
    prover_addresses: Json<Vec<String>>,
    encrypted_proof: Vec<u8>,
    encrypted_secret: Vec<u8>,
    ephemeral_public_key: Vec<u8>,
    status: String,
}

impl TryFrom<ProofRow> for StoredProof {
    type Error = eyre::Error;

    fn try_from(row: ProofRow) -> Result<Self, Self::Error> {
        Ok(Self {
            height: from_db(row.block_height),
            address: row.address,
            cid: row.cid,
            proof_signature: Bytes::from(row.proof_signature),
            prover_addresses: row.prover_addresses.0,
            encrypted_proof: Bytes::from(row.encrypted_proof),
            encrypted_secret: Bytes::from(row.encrypted_secret),
            ephemeral_public_key: Bytes::from(row.ephemeral_public_key),
            status: row.status.parse()?,
        })
    }
}
