//! Ordered bulk import
//!
//! Fixed sequence, no optional reordering:
//! `Client → Config → PaymentMethods → Categories → Vendors → Units →
//! YearEndBalances → Transactions → HOADues → WaterBills`.
//!
//! The input `Client.json` must name the target client or the run aborts
//! before touching anything. The transactions step assigns fresh document
//! ids and builds the cross-reference from legacy `paySeq` tags; the dues
//! and water steps consume it to stamp payment slots. A transactions-step
//! failure halts the sequence; failures in later steps leave the client
//! partially imported; purge before retrying.

use crate::crossref::{CrossRef, CrossRefEntry};
use crate::progress::{CancelFlag, PhaseCounter};
use crate::{ImportError, ImportResult};
use audit::{AuditEntry, AuditLogger};
use doc_store::{run_transaction, server_timestamp, DocPath, SharedStore, Store};
use dues_rs::{DuesService, SlotFill};
use fiscal_core::{calendar, Centavos, IdGenerator};
use security::Principal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tenants::{ClientConfig, TenantRegistry};
use transactions_rs::{TransactionDraft, TransactionService, SPLIT_CATEGORY};
use uuid::Uuid;
use waterbills_rs::{readings_doc, water_config_doc};

/// The exported JSON files of one client, loaded into memory
#[derive(Debug, Clone, Default)]
pub struct ImportDataset {
    pub client: Value,
    pub config: Option<Value>,
    pub payment_methods: Option<Value>,
    pub categories: Option<Value>,
    pub vendors: Option<Value>,
    pub units: Option<Value>,
    pub year_end_balances: Option<Value>,
    pub transactions: Vec<Value>,
    pub hoa_dues: Option<Value>,
    pub water: Option<Value>,
}

impl ImportDataset {
    /// Load the dataset from a directory of exported JSON files.
    /// `Client.json` is mandatory; every other file is optional.
    pub fn from_dir(dir: &Path) -> ImportResult<Self> {
        fn read(dir: &Path, name: &str) -> ImportResult<Option<Value>> {
            let path = dir.join(name);
            if !path.exists() {
                return Ok(None);
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|err| ImportError::BadDataset(format!("{name}: {err}")))?;
            serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| ImportError::BadDataset(format!("{name}: {err}")))
        }

        let client = read(dir, "Client.json")?
            .ok_or_else(|| ImportError::BadDataset("Client.json is required".to_string()))?;
        let transactions = match read(dir, "Transactions.json")? {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ImportError::BadDataset(
                    "Transactions.json must be an array".to_string(),
                ))
            }
            None => Vec::new(),
        };

        Ok(ImportDataset {
            client,
            config: read(dir, "Config.json")?,
            payment_methods: read(dir, "PaymentMethods.json")?,
            categories: read(dir, "Categories.json")?,
            vendors: read(dir, "Vendors.json")?,
            units: read(dir, "Units.json")?,
            year_end_balances: read(dir, "YearEndBalances.json")?,
            transactions,
            hoa_dues: read(dir, "HOADues.json")?,
            water: read(dir, "WaterBills.json")?,
        })
    }
}

/// One step's tally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step: String,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub percent: u8,
}

/// The whole run's outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub run_id: String,
    pub client_id: String,
    pub steps: Vec<StepReport>,
    /// Legacy `-split-` records with no allocations, surfaced not imported
    pub corrupt_transactions: Vec<String>,
    pub cross_ref_entries: usize,
    pub unresolved_pay_seqs: usize,
}

/// Runs the fixed import sequence against one client
pub struct ImportOrchestrator {
    store: SharedStore,
    audit: AuditLogger,
    ids: Arc<IdGenerator>,
}

impl ImportOrchestrator {
    pub fn new(store: SharedStore, audit: AuditLogger, ids: Arc<IdGenerator>) -> Self {
        Self { store, audit, ids }
    }

    pub async fn import(
        &self,
        principal: &Principal,
        client_id: &str,
        dataset: &ImportDataset,
        cancel: &CancelFlag,
    ) -> ImportResult<ImportSummary> {
        security::ensure_admin(principal, client_id)?;

        // Safety check before anything mutates
        let found = dataset
            .client
            .get("clientId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if found != client_id {
            return Err(ImportError::ClientIdMismatch {
                expected: client_id.to_string(),
                found,
            });
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let mut summary = ImportSummary {
            run_id: run_id.clone(),
            client_id: client_id.to_string(),
            ..Default::default()
        };
        self.audit
            .record(
                client_id,
                AuditEntry::new("importctl", "importStart", format!("clients/{client_id}"), &principal.user_id)
                    .doc_id(&run_id),
            )
            .await?;

        // Client
        self.check_cancel(cancel, client_id, &run_id, &summary).await?;
        self.store
            .set(&tenants::client_doc(client_id)?, dataset.client.clone())
            .await?;
        summary.steps.push(single_step("client"));
        self.persist_progress(client_id, &run_id, "running", &summary).await?;

        // Later steps need the validated client configuration
        let config = TenantRegistry::new(self.store.clone()).load(client_id).await?;

        for (step, section, collection) in [
            ("config", &dataset.config, "config"),
            ("paymentMethods", &dataset.payment_methods, "paymentMethods"),
            ("categories", &dataset.categories, "categories"),
            ("vendors", &dataset.vendors, "vendors"),
            ("units", &dataset.units, "units"),
            ("yearEndBalances", &dataset.year_end_balances, "yearEndBalances"),
        ] {
            self.check_cancel(cancel, client_id, &run_id, &summary).await?;
            let report = self.import_map(client_id, step, collection, section).await?;
            summary.steps.push(report);
            self.persist_progress(client_id, &run_id, "running", &summary).await?;
        }

        // Transactions build the cross-reference; a failure here is fatal
        self.check_cancel(cancel, client_id, &run_id, &summary).await?;
        let mut crossref = CrossRef::new();
        let report = match self
            .import_transactions(principal, &config, dataset, &mut crossref, &mut summary)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                self.persist_progress(client_id, &run_id, "failed", &summary).await?;
                return Err(ImportError::TransactionsStepFailed(err.to_string()));
            }
        };
        summary.cross_ref_entries = crossref.len();
        summary.steps.push(report);
        self.persist_progress(client_id, &run_id, "running", &summary).await?;

        // HOADues consumes the cross-reference
        self.check_cancel(cancel, client_id, &run_id, &summary).await?;
        let report = self
            .import_hoa_dues(&config, dataset, &crossref, &mut summary)
            .await?;
        summary.steps.push(report);
        self.persist_progress(client_id, &run_id, "running", &summary).await?;

        // WaterBills consumes the cross-reference
        self.check_cancel(cancel, client_id, &run_id, &summary).await?;
        let report = self
            .import_water(client_id, dataset, &crossref, &mut summary)
            .await?;
        summary.steps.push(report);
        self.persist_progress(client_id, &run_id, "completed", &summary).await?;

        self.audit
            .record(
                client_id,
                AuditEntry::new("importctl", "importComplete", format!("clients/{client_id}"), &principal.user_id)
                    .doc_id(&run_id)
                    .metadata(serde_json::to_value(&summary).unwrap_or_default()),
            )
            .await?;

        tracing::info!(
            client_id = %client_id,
            run_id = %run_id,
            steps = summary.steps.len(),
            cross_ref_entries = summary.cross_ref_entries,
            "import complete"
        );
        Ok(summary)
    }

    async fn check_cancel(
        &self,
        cancel: &CancelFlag,
        client_id: &str,
        run_id: &str,
        summary: &ImportSummary,
    ) -> ImportResult<()> {
        if cancel.is_cancelled() {
            self.persist_progress(client_id, run_id, "cancelled", summary).await?;
            return Err(ImportError::Cancelled);
        }
        Ok(())
    }

    /// Running tally, readable by a progress poll
    async fn persist_progress(
        &self,
        client_id: &str,
        run_id: &str,
        status: &str,
        summary: &ImportSummary,
    ) -> ImportResult<()> {
        let path = DocPath::parse(format!("clients/{client_id}/importMetadata/{run_id}"))?;
        self.store
            .set(
                &path,
                json!({
                    "status": status,
                    "steps": summary.steps,
                    "crossRefEntries": summary.cross_ref_entries,
                    "updated": server_timestamp(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Generic map-of-documents step: each key becomes a document id
    async fn import_map(
        &self,
        client_id: &str,
        step: &str,
        collection: &str,
        section: &Option<Value>,
    ) -> ImportResult<StepReport> {
        let entries: Map<String, Value> = match section {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ImportError::BadDataset(format!(
                    "{step} must be an object keyed by document id"
                )))
            }
            None => Map::new(),
        };

        let mut counter = PhaseCounter::new(step, Some(entries.len()));
        for (id, data) in entries {
            let path = DocPath::parse(format!("clients/{client_id}/{collection}/{id}"))?;
            self.store.set(&path, data).await?;
            counter.success();
        }
        Ok(report_from(&counter))
    }

    async fn import_transactions(
        &self,
        principal: &Principal,
        config: &ClientConfig,
        dataset: &ImportDataset,
        crossref: &mut CrossRef,
        summary: &mut ImportSummary,
    ) -> ImportResult<StepReport> {
        let service = TransactionService::new(
            self.store.clone(),
            self.audit.clone(),
            self.ids.clone(),
        );
        let mut counter = PhaseCounter::new("transactions", Some(dataset.transactions.len()));

        for (index, raw) in dataset.transactions.iter().enumerate() {
            let label = raw
                .get("paySeq")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{index}"));

            // Legacy corruption: a split marker with no breakdown. Recorded
            // and surfaced, never silently imported.
            let is_corrupt_split = raw.get("categoryId").and_then(|v| v.as_str())
                == Some(SPLIT_CATEGORY)
                && raw
                    .get("allocations")
                    .map(|a| a.is_null())
                    .unwrap_or(true);
            if is_corrupt_split {
                self.audit
                    .record(
                        &config.client_id,
                        AuditEntry::new(
                            "importctl",
                            "corruptTransaction",
                            format!("clients/{}/transactions", config.client_id),
                            &principal.user_id,
                        )
                        .notes(format!("split with null allocations: {label}")),
                    )
                    .await?;
                summary.corrupt_transactions.push(label);
                counter.failure();
                continue;
            }

            let draft: TransactionDraft = match serde_json::from_value(raw.clone()) {
                Ok(draft) => draft,
                Err(err) => {
                    tracing::warn!(record = %label, error = %err, "transaction record malformed");
                    counter.failure();
                    continue;
                }
            };
            let unit_id = draft.unit_id.clone();
            let amount = draft.amount;
            let date = draft.date.clone();
            // Older exports tagged linkage inside the notes text instead of
            // a paySeq field; extract it here, after which notes are
            // free-form documentation nothing reads
            let pay_seq = draft
                .pay_seq
                .clone()
                .or_else(|| draft.notes.as_deref().and_then(legacy_txn_tag));

            match service.create(principal, config, draft).await {
                Ok(txn_id) => {
                    if let Some(pay_seq) = pay_seq {
                        crossref.insert(
                            &pay_seq,
                            CrossRefEntry {
                                transaction_id: txn_id,
                                unit_id,
                                amount,
                                date,
                            },
                        );
                    }
                    counter.success();
                }
                Err(transactions_rs::TransactionError::Validation(err)) => {
                    tracing::warn!(record = %label, error = %err, "transaction rejected");
                    counter.failure();
                }
                // Anything else is a hard failure of the step
                Err(err) => return Err(err.into()),
            }
        }
        Ok(report_from(&counter))
    }

    async fn import_hoa_dues(
        &self,
        config: &ClientConfig,
        dataset: &ImportDataset,
        crossref: &CrossRef,
        summary: &mut ImportSummary,
    ) -> ImportResult<StepReport> {
        let by_unit: Map<String, Value> = match &dataset.hoa_dues {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ImportError::BadDataset(
                    "HOADues must be an object keyed by unit id".to_string(),
                ))
            }
            None => Map::new(),
        };
        let dues = DuesService::new(self.store.clone(), self.audit.clone());
        let mut counter = PhaseCounter::new("hoaDues", None);

        for (unit_id, years) in by_unit {
            let Some(years) = years.as_object() else {
                counter.failure();
                continue;
            };
            for (year_raw, record) in years {
                let Ok(year) = year_raw.parse::<i32>() else {
                    counter.failure();
                    continue;
                };
                dues.ensure_year(config, &unit_id, year).await?;

                // Group slot payments by the transaction resolved from the
                // legacy payment sequence
                let mut groups: BTreeMap<String, (Vec<SlotFill>, String)> = BTreeMap::new();
                for slot in record
                    .get("payments")
                    .and_then(|v| v.as_array())
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
                {
                    let month = slot.get("month").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    let amount = slot
                        .get("amount")
                        .and_then(|v| v.as_i64())
                        .map(Centavos::new)
                        .unwrap_or(Centavos::ZERO);
                    if amount <= Centavos::ZERO {
                        continue;
                    }
                    let seq = slot
                        .get("paySeq")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .or_else(|| {
                            slot.get("notes").and_then(|v| v.as_str()).and_then(legacy_txn_tag)
                        });
                    let resolved = seq.as_deref().and_then(|seq| crossref.resolve(seq));
                    match resolved {
                        Some(entry) => {
                            let group = groups
                                .entry(entry.transaction_id.clone())
                                .or_insert_with(|| (Vec::new(), entry.date.clone()));
                            group.0.push(SlotFill { month, amount });
                        }
                        None => {
                            // A paid slot with no transaction breaks the
                            // ledger's cross-reference invariant
                            summary.unresolved_pay_seqs += 1;
                            counter.failure();
                        }
                    }
                }

                for (txn_id, (fills, date_raw)) in groups {
                    let payment_date = calendar::parse_civil_date(&date_raw)
                        .map_err(|_| ImportError::BadDataset(format!("payment date '{date_raw}'")))?;
                    let client_id = config.client_id.clone();
                    let unit_for_tx = unit_id.clone();
                    let fills_for_tx = fills.clone();
                    let txn_for_tx = txn_id.clone();
                    run_transaction(&self.store, move |tx| {
                        let client_id = client_id.clone();
                        let unit_id = unit_for_tx.clone();
                        let fills = fills_for_tx.clone();
                        let txn_id = txn_for_tx.clone();
                        Box::pin(async move {
                            DuesService::apply_payment_in(
                                tx, &client_id, &unit_id, year, &fills, &txn_id,
                                payment_date, None, None,
                            )
                            .await
                            .map(|_| ())
                        })
                    })
                    .await?;
                    counter.success();
                }
            }
        }
        Ok(report_from(&counter))
    }

    async fn import_water(
        &self,
        client_id: &str,
        dataset: &ImportDataset,
        crossref: &CrossRef,
        summary: &mut ImportSummary,
    ) -> ImportResult<StepReport> {
        let Some(water) = &dataset.water else {
            return Ok(StepReport {
                step: "waterBills".to_string(),
                processed: 0,
                succeeded: 0,
                failed: 0,
                percent: 100,
            });
        };
        let mut counter = PhaseCounter::new("waterBills", None);

        if let Some(config) = water.get("config") {
            self.store
                .set(&water_config_doc(client_id)?, config.clone())
                .await?;
            counter.success();
        }

        if let Some(readings) = water.get("readings").and_then(|v| v.as_object()) {
            for (doc_id, data) in readings {
                let Some((year_raw, month_raw)) = doc_id.split_once('-') else {
                    counter.failure();
                    continue;
                };
                let (Ok(year), Ok(month)) = (year_raw.parse::<i32>(), month_raw.parse::<u32>())
                else {
                    counter.failure();
                    continue;
                };
                self.store
                    .set(&readings_doc(client_id, year, month)?, data.clone())
                    .await?;
                counter.success();
            }
        }

        if let Some(bills) = water.get("bills").and_then(|v| v.as_object()) {
            for (bill_id, bill) in bills {
                let mut bill = bill.clone();
                // Stamp resolved transaction ids onto payment entries
                if let Some(units) = bill
                    .get_mut("bills")
                    .and_then(|b| b.get_mut("units"))
                    .and_then(|u| u.as_object_mut())
                {
                    for unit in units.values_mut() {
                        let Some(payments) =
                            unit.get_mut("payments").and_then(|p| p.as_array_mut())
                        else {
                            continue;
                        };
                        for payment in payments {
                            let resolved = payment
                                .get("paySeq")
                                .and_then(|v| v.as_str())
                                .and_then(|seq| crossref.resolve(seq))
                                .map(|entry| entry.transaction_id.clone());
                            match resolved {
                                Some(txn_id) => {
                                    payment["transactionId"] = json!(txn_id);
                                }
                                None => {
                                    summary.unresolved_pay_seqs += 1;
                                }
                            }
                        }
                    }
                }
                self.store
                    .set(&waterbills_rs::bill_doc(client_id, bill_id)?, bill)
                    .await?;
                counter.success();
            }
        }
        Ok(report_from(&counter))
    }
}

/// Pull a legacy `TxnID:` tag out of a free-form notes string
fn legacy_txn_tag(notes: &str) -> Option<String> {
    let start = notes.find("TxnID:")? + "TxnID:".len();
    let token: String = notes[start..]
        .trim_start()
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != ';' && *c != ',')
        .collect();
    (!token.is_empty()).then_some(token)
}

fn single_step(step: &str) -> StepReport {
    StepReport {
        step: step.to_string(),
        processed: 1,
        succeeded: 1,
        failed: 0,
        percent: 100,
    }
}

fn report_from(counter: &PhaseCounter) -> StepReport {
    let event = counter.event();
    StepReport {
        step: event.phase,
        processed: event.processed,
        succeeded: event.succeeded,
        failed: event.failed,
        percent: event.percent.unwrap_or(100),
    }
}
