//! Tests for command construction and validation at the handler boundary.
//!
//! Full handler execution (lock acquisition, event append, outbox enqueue)
//! requires a database and Redis connection and lives in the integration
//! test suite.

#[cfg(test)]
mod tests {
    use crate::aggregate::wallet::Wallet;
    use crate::aggregate::Aggregate;
    use crate::domain::{Balance, DomainError, MinorUnits};
    use crate::handlers::{CreateWalletCommand, CreditCommand, DebitCommand, TransferCommand};

    #[test]
    fn create_wallet_command_round_trips_through_serde() {
        let cmd = CreateWalletCommand {
            wallet_id: "w1".to_string(),
            owner_id: "u1".to_string(),
            initial_balance: 5000,
        };

        let value = serde_json::to_value(&cmd).unwrap();
        let back: CreateWalletCommand = serde_json::from_value(value).unwrap();

        assert_eq!(back.wallet_id, "w1");
        assert_eq!(back.initial_balance, 5000);
    }

    #[test]
    fn credit_command_rejects_non_positive_amount_at_the_aggregate() {
        let (wallet, _) = Wallet::create("w1", "u1", Balance::zero());

        let cmd = CreditCommand {
            wallet_id: "w1".to_string(),
            amount: 0,
            description: None,
        };

        let result = MinorUnits::new(cmd.amount);
        assert!(result.is_err());
        let _ = wallet;
    }

    #[test]
    fn debit_command_amount_exceeding_balance_is_rejected() {
        let (wallet, _) = Wallet::create("w1", "u1", Balance::new(1000).unwrap());

        let cmd = DebitCommand {
            wallet_id: "w1".to_string(),
            amount: 5000,
            description: None,
        };

        let amount = MinorUnits::new(cmd.amount).unwrap();
        let result = wallet.debit(&amount, cmd.description);

        assert!(matches!(result, Err(DomainError::InsufficientFunds { .. })));
    }

    #[test]
    fn debit_command_within_balance_succeeds() {
        let (wallet, _) = Wallet::create("w1", "u1", Balance::new(1000).unwrap());

        let cmd = DebitCommand {
            wallet_id: "w1".to_string(),
            amount: 400,
            description: Some("withdrawal".to_string()),
        };

        let amount = MinorUnits::new(cmd.amount).unwrap();
        let event = wallet.debit(&amount, cmd.description).unwrap();
        let wallet = wallet.apply(event);

        assert_eq!(wallet.balance().value(), 600);
    }

    #[test]
    fn transfer_command_between_distinct_wallets_builds_two_legs() {
        let cmd = TransferCommand {
            from_wallet_id: "w1".to_string(),
            to_wallet_id: "w2".to_string(),
            amount: 250,
            description: Some("rent".to_string()),
        };

        assert_ne!(cmd.from_wallet_id, cmd.to_wallet_id);
        assert_eq!(cmd.amount, 250);
    }

    #[test]
    fn transfer_command_deserializes_without_description() {
        let json = r#"{"from_wallet_id": "w1", "to_wallet_id": "w2", "amount": 100}"#;
        let cmd: TransferCommand = serde_json::from_str(json).unwrap();
        assert!(cmd.description.is_none());
    }
}
