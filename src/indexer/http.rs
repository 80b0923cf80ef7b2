use anyhow::{anyhow, Result};
use async_trait::async_trait;
use format_url::FormatUrl;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    beacon_chain::{Epoch, EpochRange, ValidatorIndex},
    execution_chain::{BlockNumber, BlockRange},
};

use super::{
    BalanceStatistic, FailedAttestationStatistic, FullBlock, IndexedExecutionBlock, Indexer,
    ProposerIncome, SyncDutyStatistic, ValidatorBalance,
};

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Serialize)]
struct BlockNumbersRequest<'a> {
    block_numbers: &'a [BlockNumber],
}

#[derive(Serialize)]
struct BalanceHistoryRequest<'a> {
    validator_indices: &'a [ValidatorIndex],
    epoch: Epoch,
}

#[derive(Clone, Debug)]
pub struct IndexerHttp {
    server_url: String,
    client: reqwest::Client,
}

impl IndexerHttp {
    pub fn new(server_url: &str) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn make_epoch_range_url(&self, path: &str, range: &EpochRange) -> String {
        FormatUrl::new(&self.server_url)
            .with_path_template(path)
            .with_query_params(vec![
                ("from_epoch", &range.first.to_string()),
                ("to_epoch", &range.last.to_string()),
            ])
            .format_url()
    }

    async fn get_data<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let res = self.client.get(url).send().await?;
        Self::decode_envelope(res).await
    }

    async fn post_data<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let res = self.client.post(url).json(body).send().await?;
        Self::decode_envelope(res).await
    }

    async fn decode_envelope<T: DeserializeOwned>(res: reqwest::Response) -> Result<T> {
        match res.status() {
            StatusCode::OK => res
                .json::<DataEnvelope<T>>()
                .await
                .map(|envelope| envelope.data)
                .map_err(Into::into),
            status => Err(anyhow!(
                "indexer request failed. status = {} url = {}",
                status,
                res.url()
            )),
        }
    }
}

#[async_trait]
impl Indexer for IndexerHttp {
    async fn balance_statistics(&self, range: EpochRange) -> Result<Vec<BalanceStatistic>> {
        let url = self.make_epoch_range_url("/v1/validators/balance-statistics", &range);
        self.get_data(&url).await
    }

    async fn sync_duty_statistics(&self, range: EpochRange) -> Result<Vec<SyncDutyStatistic>> {
        let url = self.make_epoch_range_url("/v1/validators/sync-duty-statistics", &range);
        self.get_data(&url).await
    }

    async fn failed_attestation_counts(
        &self,
        range: EpochRange,
    ) -> Result<Vec<FailedAttestationStatistic>> {
        let url = self.make_epoch_range_url("/v1/validators/failed-attestations", &range);
        self.get_data(&url).await
    }

    async fn aggregated_income(&self, range: EpochRange) -> Result<Vec<ProposerIncome>> {
        let url = self.make_epoch_range_url("/v1/validators/income", &range);
        self.get_data(&url).await
    }

    async fn indexed_execution_blocks(
        &self,
        block_numbers: &[BlockNumber],
    ) -> Result<Vec<IndexedExecutionBlock>> {
        if block_numbers.is_empty() {
            return Ok(vec![]);
        }

        let url = FormatUrl::new(&self.server_url)
            .with_path_template("/v1/execution/indexed-blocks")
            .format_url();
        self.post_data(&url, &BlockNumbersRequest { block_numbers })
            .await
    }

    async fn full_blocks_descending(&self, range: BlockRange) -> Result<Vec<FullBlock>> {
        let url = FormatUrl::new(&self.server_url)
            .with_path_template("/v1/execution/blocks")
            .with_query_params(vec![
                ("high", &range.end.to_string()),
                ("low", &range.start.to_string()),
            ])
            .format_url();
        self.get_data(&url).await
    }

    async fn balance_history(
        &self,
        validator_indices: &[ValidatorIndex],
        epoch: Epoch,
    ) -> Result<Vec<ValidatorBalance>> {
        let url = FormatUrl::new(&self.server_url)
            .with_path_template("/v1/validators/balances")
            .format_url();
        self.post_data(
            &url,
            &BalanceHistoryRequest {
                validator_indices,
                epoch,
            },
        )
        .await
    }
}
