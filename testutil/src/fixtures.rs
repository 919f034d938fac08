/// Contract bytecode fixtures
///
/// Creation bytecode is kept as hex so the fixtures stay readable in diffs.

/// Creation bytecode of a Solidity 0.8 proxy exposing `set(bytes,bytes)` and
/// `get(bytes)`. Both forward to the extended-store precompile at `0x2712`
/// with DELEGATECALL, so entries are owned by the proxy. `set` ignores the
/// success flag of the inner call; `get` ABI-decodes the returned `bytes`.
pub const SEP101_PROXY_CREATION_HEX: &str = concat!(
    "608060405234801561001057600080fd5b50610789806100206000396000f3fe608060405234801561001057600080fd",
    "5b50600436106100415760003560e01c8063a18c751e14610046578063d6d7d52514610062578063f5ff5c7614610092",
    "575b600080fd5b610060600480360381019061005b9190610408565b6100b0565b005b61007c60048036038101906100",
    "7791906103c3565b6101d0565b60405161008991906105f5565b60405180910390f35b61009a61030b565b6040516100",
    "a7919061057b565b60405180910390f35b61271273ffffffffffffffffffffffffffffffffffffffff16604051806040",
    "0160405280601081526020017f7365742862797465732c62797465732900000000000000000000000000000000815250",
    "805190602001208585858560405160240161011d94939291906105ba565b604051602081830303815290604052907bff",
    "ffffffffffffffffffffffffffffffffffffffffffffffffffffff19166020820180517bffffffffffffffffffffffff",
    "ffffffffffffffffffffffffffffffff83818316178352505050506040516101879190610564565b6000604051808303",
    "81855af49150503d80600081146101c2576040519150601f19603f3d011682016040523d82523d6000602084013e6101",
    "c7565b606091505b50505050505050565b606060008061271273ffffffffffffffffffffffffffffffffffffffff1660",
    "40518060400160405280600a81526020017f676574286279746573290000000000000000000000000000000000000000",
    "000081525080519060200120868660405160240161023e929190610596565b604051602081830303815290604052907b",
    "ffffffffffffffffffffffffffffffffffffffffffffffffffffffff19166020820180517bffffffffffffffffffffff",
    "ffffffffffffffffffffffffffffffffff83818316178352505050506040516102a89190610564565b60006040518083",
    "0381855af49150503d80600081146102e3576040519150601f19603f3d011682016040523d82523d6000602084013e61",
    "02e8565b606091505b509150915080806020019051810190610301919061047d565b9250505092915050565b61271281",
    "565b600061032461031f84610648565b610617565b90508281526020810184848401111561033c57600080fd5b610347",
    "8482856106e0565b509392505050565b60008083601f84011261036157600080fd5b8235905067ffffffffffffffff81",
    "111561037a57600080fd5b60208301915083600182028301111561039257600080fd5b9250929050565b600082601f83",
    "01126103aa57600080fd5b81516103ba848260208601610311565b91505092915050565b600080602083850312156103",
    "d657600080fd5b600083013567ffffffffffffffff8111156103f057600080fd5b6103fc8582860161034f565b925092",
    "50509250929050565b6000806000806040858703121561041e57600080fd5b600085013567ffffffffffffffff811115",
    "61043857600080fd5b6104448782880161034f565b9450945050602085013567ffffffffffffffff8111156104635760",
    "0080fd5b61046f8782880161034f565b925092505092959194509250565b60006020828403121561048f57600080fd5b",
    "600082015167ffffffffffffffff8111156104a957600080fd5b6104b584828501610399565b91505092915050565b61",
    "04c78161069f565b82525050565b60006104d98385610683565b93506104e68385846106d1565b6104ef83610742565b",
    "840190509392505050565b600061050582610678565b61050f8185610683565b935061051f8185602086016106e0565b",
    "61052881610742565b840191505092915050565b600061053e82610678565b6105488185610694565b93506105588185",
    "602086016106e0565b80840191505092915050565b60006105708284610533565b915081905092915050565b60006020",
    "8201905061059060008301846104be565b92915050565b600060208201905081810360008301526105b18184866104cd",
    "565b90509392505050565b600060408201905081810360008301526105d58186886104cd565b90508181036020830152",
    "6105ea8184866104cd565b905095945050505050565b6000602082019050818103600083015261060f81846104fa565b",
    "905092915050565b6000604051905081810181811067ffffffffffffffff8211171561063e5761063d610713565b5b80",
    "60405250919050565b600067ffffffffffffffff82111561066357610662610713565b5b601f19601f83011690506020",
    "81019050919050565b600081519050919050565b600082825260208201905092915050565b600081905092915050565b",
    "60006106aa826106b1565b9050919050565b600073ffffffffffffffffffffffffffffffffffffffff82169050919050",
    "565b82818337600083830152505050565b60005b838110156106fe5780820151818401526020810190506106e3565b83",
    "81111561070d576000848401525b50505050565b7f4e487b710000000000000000000000000000000000000000000000",
    "0000000000600052604160045260246000fd5b6000601f19601f830116905091905056fea2646970667358221220fb43",
    "e5de781849eed8012fcec370be5db5d6a1c9ad988f9fc8d3b49cde95ffe364736f6c63430008000033",
);

/// Runtime: copy calldata, CALL `0x2712` with it (value 0, all gas), then
/// RETURN empty. Entries written through it are owned by the forwarder.
pub const FORWARDER_CREATION_HEX: &str = concat!(
    // init: CODECOPY 25 bytes of runtime from offset 12, RETURN them
    "6019600c60003960196000f3",
    // runtime
    "3660006000376000600036600060006127125af1",
    "60006000f3",
);

/// Forwarder that uses STATICCALL instead of CALL
pub const STATIC_FORWARDER_CREATION_HEX: &str = concat!(
    // init: CODECOPY 23 bytes of runtime from offset 12, RETURN them
    "6017600c60003960176000f3",
    // runtime
    "36600060003760006000366000612712",
    "5afa60006000f3",
);

/// Like the forwarder, but REVERTs after the inner call whenever the
/// transaction carries a non-zero value. Lets one contract both commit and
/// roll back writes into the same namespace.
pub const CONDITIONAL_FORWARDER_CREATION_HEX: &str = concat!(
    // init: CODECOPY 35 bytes of runtime from offset 12, RETURN them
    "6023600c60003960236000f3",
    // runtime
    "3660006000376000600036600060006127125af1",
    // CALLVALUE; JUMPI to the revert branch at 0x1d
    "34601d57",
    "60006000f3",
    "5b60006000fd",
);

/// Decode one of the hex fixtures above
pub fn hex_fixture(hex_str: &str) -> Vec<u8> {
    hex::decode(hex_str).expect("fixture hex is valid")
}

/// Decoded SEP101 proxy creation bytecode
pub fn sep101_proxy_bytecode() -> Vec<u8> {
    hex_fixture(SEP101_PROXY_CREATION_HEX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_decode() {
        assert!(!sep101_proxy_bytecode().is_empty());
        assert_eq!(hex_fixture(FORWARDER_CREATION_HEX).len(), 12 + 25);
        assert_eq!(hex_fixture(CONDITIONAL_FORWARDER_CREATION_HEX).len(), 12 + 35);
        assert_eq!(hex_fixture(STATIC_FORWARDER_CREATION_HEX).len(), 12 + 23);
    }

    #[test]
    fn test_proxy_exposes_sep101_selectors() {
        let code = sep101_proxy_bytecode();
        let contains = |needle: &[u8]| code.windows(needle.len()).any(|w| w == needle);
        assert!(contains(&[0xa1, 0x8c, 0x75, 0x1e]));
        assert!(contains(&[0xd6, 0xd7, 0xd5, 0x25]));
    }
}
