use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::{
    error::{Error, Result},
    store::{AccountBalanceSnapshot, BlockRecord, DocumentStore, ScanDirection, TransactionRecord},
};

/*
    Elasticsearch adapter

    Speaks the plain REST API: existence-checked index creation at startup,
    NDJSON `_bulk` writes for every record type, and `_search` queries for
    cursor derivation and the observed-address aggregation.
*/

pub const BLOCKS_INDEX: &str = "blocks";
pub const TRANSACTIONS_INDEX: &str = "transactions";
pub const ACCOUNTS_INDEX: &str = "accounts";

const INDICES: [&str; 3] = [BLOCKS_INDEX, TRANSACTIONS_INDEX, ACCOUNTS_INDEX];

// terms aggregations cap the bucket count; addresses beyond this are picked up
// once older ones fall out of the sampled set
const AGGREGATION_SIZE: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct ElasticStore {
    http: Client,
    endpoint: Url,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticStore {
    pub fn new(endpoint: Url, username: Option<String>, password: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            username,
            password,
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.endpoint.join(path)?)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    async fn bulk<T: Serialize>(&self, index: &str, docs: &[T]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let body = bulk_body(index, docs)?;

        let res = self
            .authed(self.http.post(self.url("_bulk")?))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::Store(format!(
                "bulk write to {index} failed with status {status}"
            )));
        }

        let value: Value = res.json().await?;
        if value["errors"].as_bool().unwrap_or(false) {
            return Err(Error::Store(format!(
                "bulk write to {index} rejected: {}",
                first_bulk_error(&value).unwrap_or("unknown reason")
            )));
        }

        debug!(index, docs = docs.len(), "bulk write");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for ElasticStore {
    async fn create_indices(&self) -> Result<()> {
        for index in INDICES {
            let exists = self
                .authed(self.http.head(self.url(index)?))
                .send()
                .await?
                .status();

            match exists {
                StatusCode::OK => continue,
                StatusCode::NOT_FOUND => {}
                status => {
                    return Err(Error::Store(format!(
                        "existence check for index {index} failed with status {status}"
                    )));
                }
            }

            let res = self
                .authed(self.http.put(self.url(index)?))
                .json(&index_settings())
                .send()
                .await?;

            let status = res.status();
            if !status.is_success() {
                let body = res.text().await.unwrap_or_default();
                return Err(Error::Store(format!(
                    "create index {index} failed with status {status}: {body}"
                )));
            }

            debug!(index, "created index");
        }
        Ok(())
    }

    async fn last_indexed_block(&self, direction: ScanDirection) -> Result<u64> {
        let order = match direction {
            ScanDirection::Forward => "desc",
            ScanDirection::Backward => "asc",
        };

        let res = self
            .authed(
                self.http
                    .post(self.url(&format!("{BLOCKS_INDEX}/_search"))?),
            )
            .json(&json!({
                "size": 1,
                "sort": [{ "number": { "order": order } }],
            }))
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !status.is_success() {
            return Err(Error::Store(format!(
                "last indexed block query failed with status {status}"
            )));
        }

        let value: Value = res.json().await?;
        Ok(parse_last_indexed(&value))
    }

    async fn index_block(&self, block: &BlockRecord) -> Result<()> {
        self.bulk(BLOCKS_INDEX, std::slice::from_ref(block)).await
    }

    async fn index_transactions(&self, transactions: &[TransactionRecord]) -> Result<()> {
        self.bulk(TRANSACTIONS_INDEX, transactions).await
    }

    async fn index_account_balances(&self, balances: &[AccountBalanceSnapshot]) -> Result<()> {
        self.bulk(ACCOUNTS_INDEX, balances).await
    }

    async fn addresses(&self) -> Result<Vec<String>> {
        let res = self
            .authed(
                self.http
                    .post(self.url(&format!("{TRANSACTIONS_INDEX}/_search"))?),
            )
            .json(&json!({
                "size": 0,
                "aggs": {
                    "unique_from_addresses": {
                        "terms": { "field": "from.keyword", "size": AGGREGATION_SIZE }
                    },
                    "unique_to_addresses": {
                        "terms": { "field": "to.keyword", "size": AGGREGATION_SIZE }
                    },
                },
            }))
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !status.is_success() {
            return Err(Error::Store(format!(
                "address aggregation failed with status {status}"
            )));
        }

        let value: Value = res.json().await?;
        Ok(parse_addresses(&value))
    }
}

fn index_settings() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0,
        },
        "mappings": {
            "properties": {
                "timestamp": {
                    "type": "date",
                    "format": "strict_date_optional_time||epoch_millis",
                },
            },
        },
    })
}

fn bulk_body<T: Serialize>(index: &str, docs: &[T]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        body.push_str(&serde_json::to_string(&json!({ "index": { "_index": index } }))?);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

fn first_bulk_error(value: &Value) -> Option<&str> {
    value["items"]
        .as_array()?
        .iter()
        .find_map(|item| item["index"]["error"]["reason"].as_str())
}

fn parse_last_indexed(value: &Value) -> u64 {
    value["hits"]["hits"][0]["_source"]["number"]
        .as_u64()
        .unwrap_or(0)
}

fn parse_addresses(value: &Value) -> Vec<String> {
    let mut out = BTreeSet::new();
    for agg in ["unique_from_addresses", "unique_to_addresses"] {
        let Some(buckets) = value["aggregations"][agg]["buckets"].as_array() else {
            continue;
        };
        for bucket in buckets {
            if let Some(key) = bucket["key"].as_str() {
                // unset recipients surface as empty-ish keys
                if !key.is_empty() && key != "0x" {
                    out.insert(key.to_string());
                }
            }
        }
    }
    out.into_iter().collect()
}
