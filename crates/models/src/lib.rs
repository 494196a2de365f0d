use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Shopping memo records
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Kaimemo {
	pub id: String,
	pub tag: String,
	pub name: String,
	#[serde(default)]
	pub done: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct CreateKaimemoRequest {
	#[serde(rename = "tempUserID", default)]
	pub temp_user_id: String,
	pub tag: String,
	pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct RemoveKaimemoRequest {
	#[serde(rename = "tempUserID", default)]
	pub temp_user_id: String,
}

// Monetary records
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KaimemoAmount {
	pub id: String,
	pub date: String,
	pub tag: String,
	pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct CreateKaimemoAmountRequest {
	#[serde(rename = "tempUserID", default)]
	pub temp_user_id: String,
	pub date: String,
	pub tag: String,
	pub amount: i64,
}

// Derived summaries
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySummary {
	pub week_start: String,
	pub week_end: String,
	pub total_amount: i64,
	pub items: Vec<KaimemoAmount>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
	pub month: String,
	pub total_amount: i64,
	pub tag_totals: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KaimemoSummaryResponse {
	pub monthly_summaries: Vec<MonthlySummary>,
	pub weekly_summaries: Vec<WeeklySummary>,
}

/// Inbound message on a live-update connection.
///
/// Older clients send `"methodType": "1"` / `"2"`, newer ones the names.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "methodType")]
pub enum TelegraphRequest {
	#[serde(rename = "create", alias = "1")]
	Create { tag: String, name: String },
	#[serde(rename = "delete", alias = "2")]
	Delete { id: String },
}
