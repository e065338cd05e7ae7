//! The chain executor.
//!
//! Advances one signal chain per admitted delivery: CANCAL, then ENTER,
//! then BATCH_TPS, in order, under per-key serialization. Flags only ever
//! advance; a failed step leaves its flag clear so a later delivery can
//! retry it.

use crate::error::{ChainError, ChainResult};
use crate::memo::LastEntryMemo;
use crate::queue::KeyedQueue;
use crate::report::{DispatchOutcome, DispatchStatus, DispatchSummary, StepReport};
use crate::seen::{SeenEntry, SeenSet};
use crate::settings::ChainSettings;
use crate::state::{ChainFlags, ChainMap, ChainRecord, ChainSnapshot, SlotPresence};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use tvr_core::{
    tp_client_order_id, EnterPayload, OrderSide, Scope, SignalMessage, SignalPayload, Step,
};
use tvr_exchange::{
    close_position_for_symbol, find_position, flatten, is_flat, wait_until_flat, BatchLeg,
    ExchangeClient, FlattenReport, FlattenRequest, ProductCache,
};
use tvr_sizing::{
    clamp_legs_to_position, infer_position_units, lots_from_amount, normalize_tp_size,
    BudgetInputs,
};

/// Settling delay before reading the position back for lot-mult learning.
const LEARN_DELAY: Duration = Duration::from_millis(1_500);

/// Chain executor and its process-wide state.
pub struct Dispatcher {
    client: Arc<ExchangeClient>,
    products: Arc<ProductCache>,
    settings: ChainSettings,
    seen: Mutex<SeenSet>,
    chains: Mutex<ChainMap>,
    memo: Mutex<LastEntryMemo>,
    queue: KeyedQueue,
}

impl Dispatcher {
    pub fn new(
        client: Arc<ExchangeClient>,
        products: Arc<ProductCache>,
        settings: ChainSettings,
    ) -> Self {
        Self {
            client,
            products,
            settings,
            seen: Mutex::new(SeenSet::new()),
            chains: Mutex::new(ChainMap::new()),
            memo: Mutex::new(LastEntryMemo::new()),
            queue: KeyedQueue::new(),
        }
    }

    /// Handle one delivery under its queue key.
    pub async fn handle(&self, msg: SignalMessage) -> ChainResult<DispatchOutcome> {
        let key = msg.queue_key();
        self.queue.run(&key, self.dispatch(msg)).await
    }

    /// Seen-set snapshot for the debug surface.
    pub fn debug_seen(&self) -> Vec<SeenEntry> {
        self.seen.lock().snapshot()
    }

    /// Chain snapshot for the debug surface.
    pub fn debug_chains(&self) -> Vec<ChainSnapshot> {
        self.chains.lock().snapshot()
    }

    async fn dispatch(&self, msg: SignalMessage) -> ChainResult<DispatchOutcome> {
        let fingerprint = msg.fingerprint();
        if !self.seen.lock().admit(&fingerprint) {
            debug!(sig_id = %msg.sig_id, step = %msg.step(), "duplicate delivery dropped");
            return Ok(DispatchOutcome::Dedup);
        }

        let sig_key = msg.sig_key();
        let sig_id = msg.sig_id.clone();
        let symbol = msg.product_symbol.clone();
        let inbound_step = msg.step();
        info!(sig_id = %sig_id, step = %inbound_step, symbol = %symbol, "signal admitted");

        // Enforce the window against the existing record BEFORE upsert:
        // upsert's eviction would replace an over-window record with a
        // fresh zero-age one and the guard would never fire.
        {
            let mut chains = self.chains.lock();
            let window_ms = self.settings.window.as_millis() as u64;
            if let Some(age) = chains.age_of(&sig_key) {
                let age_ms = age.as_millis() as u64;
                if age_ms > window_ms {
                    warn!(sig_id = %sig_id, age_ms, window_ms, "chain expired");
                    return Err(ChainError::Expired { age_ms, window_ms });
                }
            }
            chains.upsert(&sig_key, msg);
        }

        let mut progressed: Vec<StepReport> = Vec::new();

        // --- CANCAL ---
        let (flags, cancel_msg, enter_present) =
            self.view(&sig_key, |r| (r.flags, r.cancel_msg.clone(), r.enter_msg.is_some()))?;
        if !flags.cancel {
            if let Some(cmsg) = cancel_msg {
                let report = self.run_cancel(&cmsg).await?;
                self.set_flags(&sig_key, |f| f.cancel = true);
                progressed.push(report);
            } else if enter_present && self.settings.auto_cancel_on_enter {
                let report = self.run_synthesized_cancel(&symbol).await?;
                self.set_flags(&sig_key, |f| f.cancel = true);
                progressed.push(report);
            } else if enter_present && inbound_step != Step::Enter {
                // ENTER has been parked since an earlier delivery and the
                // chain has moved on without a CANCAL; waiting longer would
                // wedge it. Advance with a note instead.
                self.set_flags(&sig_key, |f| f.cancel = true);
                progressed.push(StepReport::Cancel {
                    scope: Scope::Symbol.to_string(),
                    canceled: 0,
                    canceled_all: false,
                    closed: false,
                    closed_all: false,
                    synthesized: false,
                    skipped: Some("no CANCAL received".to_string()),
                });
            } else {
                return Ok(self.queued(&sig_key, Step::Cancal, progressed));
            }
        }

        // --- ENTER ---
        let (flags, enter_msg) = self.view(&sig_key, |r| (r.flags, r.enter_msg.clone()))?;
        if !flags.enter {
            let Some(emsg) = enter_msg else {
                return Ok(self.queued(&sig_key, Step::Enter, progressed));
            };
            let SignalPayload::Enter(payload) = emsg.payload.clone() else {
                return Err(ChainError::Validation("enter slot holds a non-ENTER message".into()));
            };

            let ran_preflight = if !flags.enter_prep {
                let ran = self.run_enter_preflight(&symbol, &payload).await?;
                self.set_flags(&sig_key, |f| f.enter_prep = true);
                ran
            } else {
                false
            };

            if payload.require_flat.unwrap_or(true) {
                self.ensure_flat(&symbol).await?;
            }

            let lot_mult = self.products.lot_mult(&symbol).await?;
            let size = self.entry_size(&symbol, &payload, lot_mult).await?;

            self.client
                .place_market_order(&symbol, payload.side, size, false)
                .await?;
            info!(sig_id = %sig_id, symbol = %symbol, side = %payload.side, size, "entry placed");

            self.memo.lock().record(&symbol, size, payload.side, lot_mult);
            self.spawn_lot_mult_learning(symbol.clone(), size);

            self.set_flags(&sig_key, |f| f.enter = true);
            progressed.push(StepReport::Enter {
                side: payload.side,
                size,
                preflight: ran_preflight,
            });
        }

        // --- BATCH_TPS ---
        let (flags, batch_msg) = self.view(&sig_key, |r| (r.flags, r.batch_msg.clone()))?;
        if !flags.batch {
            let Some(bmsg) = batch_msg else {
                return Ok(self.queued(&sig_key, Step::BatchTps, progressed));
            };
            let report = self.run_batch(&sig_id, &symbol, &bmsg).await?;
            self.set_flags(&sig_key, |f| f.batch = true);
            progressed.push(report);
        }

        let (have, did) = self.view(&sig_key, |r| (r.have(), r.flags))?;
        let status = if did.all_done() { DispatchStatus::Done } else { DispatchStatus::Progressed };
        Ok(DispatchOutcome::Summary(DispatchSummary {
            status,
            have,
            did,
            progressed,
        }))
    }

    /// Execute a buffered CANCAL message.
    async fn run_cancel(&self, msg: &SignalMessage) -> ChainResult<StepReport> {
        let SignalPayload::Cancal(payload) = &msg.payload else {
            return Err(ChainError::Validation("cancel slot holds a non-CANCAL message".into()));
        };
        let settings = &self.settings;
        let cancel_orders = payload
            .cancel_orders
            .unwrap_or(settings.force_cancel_orders_on_cancel);
        let close_position = payload
            .close_position
            .unwrap_or(settings.force_close_on_cancel);

        let report = if msg.scope.is_all() {
            flatten(
                &self.client,
                &self.products,
                &FlattenRequest {
                    scope: Scope::All,
                    symbol: String::new(),
                    cancel_orders,
                    close_position,
                    cancel_fallback_all: payload.cancel_fallback_all,
                },
            )
            .await?
        } else if payload.cancel_orders_scope == Some(Scope::All) {
            // Orders swept globally, position closed per symbol.
            let mut report = FlattenReport {
                scope: Scope::Symbol.to_string(),
                ..Default::default()
            };
            if cancel_orders {
                self.client.cancel_all_orders().await?;
                report.canceled_all = true;
            }
            if close_position {
                report.closed =
                    close_position_for_symbol(&self.client, &self.products, &msg.product_symbol)
                        .await?;
            }
            report
        } else {
            flatten(
                &self.client,
                &self.products,
                &FlattenRequest {
                    scope: Scope::Symbol,
                    symbol: msg.product_symbol.clone(),
                    cancel_orders,
                    close_position,
                    cancel_fallback_all: payload.cancel_fallback_all,
                },
            )
            .await?
        };

        if payload.require_flat {
            let scope_symbol = (!msg.scope.is_all()).then_some(msg.product_symbol.as_str());
            let flat = wait_until_flat(
                &self.client,
                scope_symbol,
                settings.flat_timeout,
                settings.flat_poll,
            )
            .await;
            if !flat {
                return Err(ChainError::RequireFlatTimeout {
                    symbol: msg.product_symbol.clone(),
                });
            }
        }

        Ok(StepReport::Cancel {
            scope: report.scope.clone(),
            canceled: report.canceled,
            canceled_all: report.canceled_all,
            closed: report.closed.is_some(),
            closed_all: report.closed_all,
            synthesized: false,
            skipped: None,
        })
    }

    /// CANCAL synthesized from a buffered ENTER (auto-cancel-on-enter).
    async fn run_synthesized_cancel(&self, symbol: &str) -> ChainResult<StepReport> {
        let settings = &self.settings;
        let report = flatten(
            &self.client,
            &self.products,
            &FlattenRequest {
                scope: Scope::Symbol,
                symbol: symbol.to_string(),
                cancel_orders: settings.force_cancel_orders_on_cancel,
                close_position: settings.force_close_on_cancel,
                cancel_fallback_all: false,
            },
        )
        .await?;

        Ok(StepReport::Cancel {
            scope: report.scope.clone(),
            canceled: report.canceled,
            canceled_all: report.canceled_all,
            closed: report.closed.is_some(),
            closed_all: report.closed_all,
            synthesized: true,
            skipped: None,
        })
    }

    /// ENTER preflight flatten, when the message asks for one.
    async fn run_enter_preflight(&self, symbol: &str, payload: &EnterPayload) -> ChainResult<bool> {
        if !(payload.cancel_orders || payload.close_position) {
            return Ok(false);
        }
        flatten(
            &self.client,
            &self.products,
            &FlattenRequest {
                scope: Scope::Symbol,
                symbol: symbol.to_string(),
                cancel_orders: payload.cancel_orders,
                close_position: payload.close_position,
                cancel_fallback_all: false,
            },
        )
        .await?;
        Ok(true)
    }

    /// Probe and, if needed, wait for a flat book before entering.
    async fn ensure_flat(&self, symbol: &str) -> ChainResult<()> {
        if is_flat(&self.client, Some(symbol)).await.unwrap_or(false) {
            return Ok(());
        }
        let settings = &self.settings;
        let flat = if settings.fast_enter {
            wait_until_flat(&self.client, Some(symbol), settings.fast_enter_wait, settings.flat_poll)
                .await
                || wait_until_flat(
                    &self.client,
                    Some(symbol),
                    settings.fast_enter_retry,
                    settings.flat_poll,
                )
                .await
        } else {
            wait_until_flat(&self.client, Some(symbol), settings.flat_timeout, settings.flat_poll)
                .await
        };
        if !flat {
            return Err(ChainError::RequireFlatTimeout {
                symbol: symbol.to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the entry size in lots from qty and/or budget.
    async fn entry_size(
        &self,
        symbol: &str,
        payload: &EnterPayload,
        lot_mult: Decimal,
    ) -> ChainResult<i64> {
        let settings = &self.settings;

        let budget_lots = match payload.budget {
            Some(budget) => {
                let entry_px = match payload.entry.filter(|px| *px > Decimal::ZERO) {
                    Some(px) => px,
                    None => self.client.ticker_price_usd(symbol).await?,
                };
                Some(lots_from_amount(&BudgetInputs {
                    amount: budget.amount,
                    ccy: budget.ccy,
                    leverage: payload.leverage.unwrap_or(settings.default_leverage).max(1),
                    entry_px_usd: entry_px,
                    lot_mult,
                    fx_inr_per_usd: payload.fx_inr_per_usd.unwrap_or(settings.fx_inr_per_usd),
                    margin_buffer_pct: settings.margin_buffer_pct,
                    max_lots_per_order: settings.max_lots_per_order,
                })?)
            }
            None => None,
        };

        let size = match (payload.qty, budget_lots) {
            (Some(qty), Some(budget_max)) => qty.min(budget_max),
            (None, Some(budget_max)) => budget_max,
            (Some(qty), None) => qty,
            (None, None) => {
                return Err(ChainError::Validation(
                    "ENTER requires qty or an amount budget".into(),
                ))
            }
        };
        Ok(size.clamp(1, settings.max_lots_per_order.max(1)))
    }

    /// Execute a buffered BATCH_TPS message against the live position.
    async fn run_batch(
        &self,
        sig_id: &str,
        symbol: &str,
        msg: &SignalMessage,
    ) -> ChainResult<StepReport> {
        let SignalPayload::BatchTps(payload) = &msg.payload else {
            return Err(ChainError::Validation("batch slot holds a non-BATCH message".into()));
        };

        let product_id = self.products.product_id(symbol).await?;

        let positions = self.client.list_positions().await?;
        let row = find_position(&positions, symbol)
            .filter(|r| r.is_open())
            .ok_or_else(|| ChainError::NoOpenPosition(symbol.to_string()))?;

        let lot_mult = self.products.lot_mult(symbol).await?;
        let inferred = infer_position_units(row.size, lot_mult, row.notional, row.reference_price());
        let position_lots = inferred.lots;
        // Live position sign decides the close side, whatever the message hints.
        let close_side = OrderSide::closing(if row.size.is_sign_negative() { -1 } else { 1 });

        let hint = self.memo.lock().hint(symbol);
        let pre_lots = payload
            .legs
            .iter()
            .enumerate()
            .map(|(idx, leg)| {
                normalize_tp_size(leg, idx, lot_mult, hint, self.settings.max_lots_per_order)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let clamped = clamp_legs_to_position(&pre_lots, position_lots);
        let total: i64 = clamped.iter().sum();
        if total > position_lots {
            return Err(ChainError::BatchOversized {
                total,
                position_lots,
            });
        }
        if clamped.is_empty() {
            return Err(ChainError::NoOpenPosition(symbol.to_string()));
        }

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let legs: Vec<BatchLeg> = clamped
            .iter()
            .enumerate()
            .map(|(idx, &size)| BatchLeg {
                limit_price: payload.legs[idx].limit_price.clone(),
                size,
                side: close_side,
                order_type: "limit_order".to_string(),
                reduce_only: true,
                client_order_id: tp_client_order_id(sig_id, symbol, idx, now_ms),
                post_only: payload.legs[idx].post_only,
                mmp: payload.legs[idx].mmp,
            })
            .collect();

        self.client
            .place_batch_orders(product_id, symbol, &legs)
            .await?;
        info!(
            sig_id, symbol, side = %close_side, position_lots,
            legs = legs.len(), "take-profit batch placed"
        );

        Ok(StepReport::Batch {
            side: close_side,
            product_id,
            sizes: clamped,
            position_lots,
        })
    }

    /// Learn the lot multiplier from the position the entry produced.
    /// Detached: sizing must not wait on it.
    fn spawn_lot_mult_learning(&self, symbol: String, lots_sent: i64) {
        if lots_sent <= 0 {
            return;
        }
        let client = Arc::clone(&self.client);
        let products = Arc::clone(&self.products);
        tokio::spawn(async move {
            tokio::time::sleep(LEARN_DELAY).await;
            let rows = match client.list_positions().await {
                Ok(rows) => rows,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "lot-mult learning skipped, positions unavailable");
                    return;
                }
            };
            let Some(row) = find_position(&rows, &symbol).filter(|r| r.is_open()) else {
                debug!(symbol = %symbol, "lot-mult learning skipped, no position observed");
                return;
            };
            let candidate = row.size.abs() / Decimal::from(lots_sent);
            if let Err(e) = products.learn_lot_mult(&symbol, candidate).await {
                debug!(symbol = %symbol, error = %e, "lot-mult learning failed");
            }
        });
    }

    fn view<R>(&self, sig_key: &str, f: impl FnOnce(&ChainRecord) -> R) -> ChainResult<R> {
        let mut chains = self.chains.lock();
        match chains.get_mut(sig_key) {
            Some(record) => Ok(f(record)),
            None => Err(ChainError::Validation("chain record evicted mid-dispatch".into())),
        }
    }

    fn set_flags(&self, sig_key: &str, f: impl FnOnce(&mut ChainFlags)) {
        let mut chains = self.chains.lock();
        if let Some(record) = chains.get_mut(sig_key) {
            f(&mut record.flags);
        }
    }

    fn queued(&self, sig_key: &str, waiting_for: Step, progressed: Vec<StepReport>) -> DispatchOutcome {
        let (have, did) = self
            .view(sig_key, |r| (r.have(), r.flags))
            .unwrap_or((SlotPresence::default(), ChainFlags::default()));
        info!(waiting_for = %waiting_for, "chain waiting");
        DispatchOutcome::Queued {
            waiting_for,
            have,
            did,
            progressed,
        }
    }
}
