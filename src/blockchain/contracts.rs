// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! On-chain contract interfaces.

use alloy::sol;

// Identity registry: one entry per device, mapping role topics to accounts.
sol! {
    #[sol(rpc)]
    interface IDigitalTwin {
        function total() external view returns (uint256);
        function getTopics(uint256 id) external view returns (bytes32[] memory topics, address[] memory accounts);
    }
}

// Append-only per-account datalog.
sol! {
    #[sol(rpc)]
    interface IDatalog {
        event NewRecord(address indexed account, uint64 indexed index, uint64 timestamp, string payload);

        function record(string calldata payload) external;
        function recordCount(address account) external view returns (uint64);
        function recordAt(address account, uint64 index) external view returns (uint64 timestamp, string memory payload);
    }
}

// Start/stop commands between devices.
sol! {
    #[sol(rpc)]
    interface ILaunch {
        event NewLaunch(address indexed sender, address indexed robot, bool param);

        function launch(address robot, bool param) external;
    }
}

// Only the transfer event of the income token is needed.
sol! {
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}
