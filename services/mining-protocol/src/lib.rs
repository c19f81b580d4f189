use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: u16 = 1;

/// Output feature flag marking a coinbase output.
pub const COINBASE_OUTPUT: u32 = 1;

/// Kernel feature flag marking a coinbase kernel.
pub const COINBASE_KERNEL: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFeatures {
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub maturity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    #[serde(default)]
    pub features: OutputFeatures,
    /// Hex encoded commitment.
    pub commitment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    #[serde(default)]
    pub features: OutputFeatures,
    /// Hex encoded commitment.
    pub commitment: String,
    /// Hex encoded range proof.
    #[serde(default)]
    pub range_proof: String,
}

impl TransactionOutput {
    pub fn is_coinbase(&self) -> bool {
        self.features.flags & COINBASE_OUTPUT != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub public_nonce: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionKernel {
    #[serde(default)]
    pub features: u32,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub lock_height: u64,
    pub excess: String,
    #[serde(default)]
    pub excess_sig: Signature,
}

impl TransactionKernel {
    pub fn is_coinbase(&self) -> bool {
        self.features & COINBASE_KERNEL != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,

    /// Consensus fields the client never interprets (version, prev_hash,
    /// commitment roots, nonce, pow...). Kept verbatim so a header survives a
    /// decode/encode cycle unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlockHeader {
    pub fn at_height(height: u64) -> Self {
        BlockHeader {
            height,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockBody {
    /// Carried through untouched; merging never adds inputs.
    #[serde(default)]
    pub inputs: Vec<TransactionInput>,
    #[serde(default)]
    pub outputs: Vec<TransactionOutput>,
    #[serde(default)]
    pub kernels: Vec<TransactionKernel>,
}

impl BlockBody {
    /// Appends the outputs and kernels of `other` after this body's own.
    ///
    /// Relative order inside each source is kept and nothing is deduplicated,
    /// so the resulting lengths are always the sums of the input lengths.
    pub fn append_outputs_and_kernels(&mut self, other: BlockBody) {
        self.outputs.extend(other.outputs);
        self.kernels.extend(other.kernels);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default)]
    pub body: BlockBody,
}

/// A candidate block as handed out by the base node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub height: u64,
    /// Block reward in base units.
    pub reward: u64,
    pub block: Block,
}

impl BlockTemplate {
    /// True when the declared height agrees with the height in the block header.
    pub fn is_consistent(&self) -> bool {
        self.height == self.block.header.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseRequest {
    pub reward: u64,
    pub fee: u64,
    pub height: u64,
}

impl CoinbaseRequest {
    pub fn for_template(template: &BlockTemplate, fee: u64) -> Self {
        CoinbaseRequest {
            reward: template.reward,
            fee,
            height: template.height,
        }
    }

    /// Height and reward must be exactly the template's.
    pub fn matches(&self, template: &BlockTemplate) -> bool {
        self.reward == template.reward && self.height == template.height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinbaseTransaction {
    /// Height the wallet built the coinbase for, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,

    /// Reward the wallet built the coinbase for, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<u64>,

    pub body: BlockBody,
}

/// Builds the block to submit: the template's block with the coinbase outputs
/// and kernels appended to its body. The coinbase itself is consumed.
pub fn merge_coinbase(mut block: Block, coinbase: CoinbaseTransaction) -> Block {
    block.body.append_outputs_and_kernels(coinbase.body);
    block
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub accepted: bool,

    /// Full service response, untouched.
    pub raw: Value,
}

impl SubmissionResult {
    /// Reads a submit_block response body.
    ///
    /// A response without an `accepted` field counts as accepted: the node
    /// answers an empty message for a block it took.
    pub fn from_raw(raw: Value) -> Self {
        let accepted = raw
            .get("accepted")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        SubmissionResult { accepted, raw }
    }

    /// Human readable rejection reason, if the service gave one.
    pub fn reason(&self) -> Option<&str> {
        self.raw.get("reason").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    #[serde(default)]
    pub protocol_version: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNewBlockTemplateResponse {
    pub new_block_template: Block,
    pub block_reward: u64,
}

impl From<GetNewBlockTemplateResponse> for BlockTemplate {
    fn from(resp: GetNewBlockTemplateResponse) -> Self {
        BlockTemplate {
            height: resp.new_block_template.header.height,
            reward: resp.block_reward,
            block: resp.new_block_template,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNewBlockResponse {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCoinbaseResponse {
    pub transaction: CoinbaseTransaction,
}
