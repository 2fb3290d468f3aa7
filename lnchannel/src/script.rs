//! Descriptors of the outputs created by the funding and commitment
//! transactions of a channel.

use bitcoin::hashes::sha256;
use bitcoin::PublicKey;
use miniscript::Descriptor;

use crate::{Error, MAX_STANDARD_P2WSH_SCRIPT_SIZE};

fn check_keys(keys: &[&PublicKey]) -> Result<(), Error> {
    if keys.iter().any(|k| !k.compressed) {
        return Err(Error::InvalidKey);
    }
    Ok(())
}

fn parse_wsh_descriptor(policy: &str) -> Result<Descriptor<PublicKey>, Error> {
    let descriptor: Descriptor<PublicKey> = policy.parse()?;
    let script_len = descriptor.script_code()?.len();
    if script_len > MAX_STANDARD_P2WSH_SCRIPT_SIZE {
        return Err(Error::ScriptTooLarge(script_len));
    }
    Ok(descriptor)
}

/// Returns the descriptor of the output paying the owner of a commitment
/// transaction. The owner can spend it alone after `csv_delay` blocks, while
/// the counterparty can spend it immediately by providing the preimage of
/// `revocation_hash`, which the owner only discloses once the commitment is
/// revoked.
pub fn revocable_output_descriptor(
    owner_pk: &PublicKey,
    counterparty_pk: &PublicKey,
    revocation_hash: &sha256::Hash,
    csv_delay: u32,
) -> Result<Descriptor<PublicKey>, Error> {
    check_keys(&[owner_pk, counterparty_pk])?;
    // policy: or(and(pk(owner_pk),older(csv_delay)),and(sha256(revocation_hash),pk(counterparty_pk)))
    let policy = format!(
        "wsh(andor(pk({owner_pk}),older({csv_delay}),and_v(v:sha256({revocation_hash}),pk({counterparty_pk}))))",
        owner_pk = owner_pk,
        csv_delay = csv_delay,
        revocation_hash = revocation_hash,
        counterparty_pk = counterparty_pk,
    );
    parse_wsh_descriptor(&policy)
}

/// Same as [`revocable_output_descriptor`] but with the owner path locked until
/// the absolute `refund_height` instead of a relative delay.
pub fn absolute_output_descriptor(
    owner_pk: &PublicKey,
    counterparty_pk: &PublicKey,
    revocation_hash: &sha256::Hash,
    refund_height: u32,
) -> Result<Descriptor<PublicKey>, Error> {
    check_keys(&[owner_pk, counterparty_pk])?;
    let policy = format!(
        "wsh(andor(pk({owner_pk}),after({refund_height}),and_v(v:sha256({revocation_hash}),pk({counterparty_pk}))))",
        owner_pk = owner_pk,
        refund_height = refund_height,
        revocation_hash = revocation_hash,
        counterparty_pk = counterparty_pk,
    );
    parse_wsh_descriptor(&policy)
}

/// Returns the descriptor of the output paying the counterparty of the owner
/// of a commitment transaction, which is immediately spendable.
pub fn pay_to_key_descriptor(pk: &PublicKey) -> Result<Descriptor<PublicKey>, Error> {
    check_keys(&[pk])?;
    Ok(Descriptor::new_wpkh(*pk)?)
}

/// Returns the descriptor of a funding output that requires both parties
/// signatures, or the signature of `refund_pk` once `refund_height` is reached.
pub fn cltv_funding_descriptor(
    a: &PublicKey,
    b: &PublicKey,
    refund_pk: &PublicKey,
    refund_height: u32,
) -> Result<Descriptor<PublicKey>, Error> {
    check_keys(&[a, b, refund_pk])?;
    let (first_pk, second_pk) = crate::util::order_keys(&a.inner, &b.inner);
    let policy = format!(
        "wsh(or_d(multi(2,{first_pk},{second_pk}),and_v(v:pk({refund_pk}),after({refund_height}))))",
        first_pk = first_pk,
        second_pk = second_pk,
        refund_pk = refund_pk,
        refund_height = refund_height,
    );
    parse_wsh_descriptor(&policy)
}
