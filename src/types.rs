/// Structure string exactly as it appears in a source CSV.
/// Example: `[*]CC([*])c1ccccc1`
pub type RawSmiles = String;
/// Canonical normal form of a structure string; the deduplication key.
/// Example: `[*]CC([*])c1ccccc1`
pub type CanonicalSmiles = String;
/// Persisted foreign key of a homopolymer row (`hp_id`).
pub type HpId = i64;
/// Persisted foreign key of a property-type row (`prop_id`).
pub type PropId = i64;
/// Short property name used to look up a property type.
/// Examples: `Tg`, `D_gas`, `sol_g`
pub type ShortName = String;
/// Column name in a frame, a CSV header, or a store table.
/// Examples: `canonical_smiles`, `Value`, `solvent_smiles`
pub type ColumnName = String;
/// Identifier of a dataset inside a prepare manifest (its output stem).
/// Examples: `tg`, `gas_diffusivity`
pub type DatasetId = String;
