//! Hand-written alloy bindings for the contracts the indexers listen to.
//!
//! Only the events and view functions the indexers actually touch are
//! declared; the deployed contracts expose much more.

use alloy::sol;

pub mod deployments;

pub use alloy::providers::DynProvider as Provider;

sol! {
    /// Per-pool staking contract. One instance per chain manages all pools;
    /// pools are addressed by `pid`.
    #[sol(rpc)]
    #[derive(Debug)]
    contract MasterGardener {
        event Deposit(address indexed user, uint256 indexed pid, uint256 amount);
        event Withdraw(address indexed user, uint256 indexed pid, uint256 amount);
        event EmergencyWithdraw(address indexed user, uint256 indexed pid, uint256 amount);
        event Harvest(address indexed user, uint256 indexed pid, uint256 amount);

        function userInfo(uint256 pid, address user)
            external
            view
            returns (uint256 amount, uint256 rewardDebt);

        function poolInfo(uint256 pid)
            external
            view
            returns (
                address lpToken,
                uint256 allocPoint,
                uint256 lastRewardBlock,
                uint256 accRewardPerShare
            );
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    contract UniswapV2Pair {
        event Swap(
            address indexed sender,
            uint256 amount0In,
            uint256 amount1In,
            uint256 amount0Out,
            uint256 amount1Out,
            address indexed to
        );
    }
}

sol! {
    /// Void hunts on DFK Chain.
    ///
    /// Field order of `HuntCompleted` was verified against fixture
    /// transactions: the published ABI labels positions 2 and 3 the other way
    /// around. The names below follow the observed payload, not the ABI
    /// labels, so decode positionally via this declaration only.
    #[sol(rpc)]
    #[derive(Debug)]
    contract HuntCore {
        event HuntCompleted(
            uint256 indexed huntId,
            address indexed player,
            uint256 activityId,
            bool victory,
            uint256[] heroIds,
            uint256[] petIds
        );
        event HuntRewardMinted(
            uint256 indexed huntId,
            address indexed player,
            address item,
            uint256 amount
        );
        event HuntEquipmentMinted(
            uint256 indexed huntId,
            address indexed player,
            address equipment,
            uint256 tokenId
        );
        event HuntPetBonusReceived(
            uint256 indexed huntId,
            address indexed player,
            uint256 petId,
            uint256 bonusId,
            uint256 bonusScalar
        );
    }
}

sol! {
    /// Patrols on Metis mirror the hunt events with a leaner payload.
    #[sol(rpc)]
    #[derive(Debug)]
    contract PatrolCore {
        event PatrolCompleted(
            uint256 indexed patrolId,
            address indexed player,
            uint256 activityId,
            bool victory,
            uint256[] heroIds,
            uint256[] petIds
        );
        event PatrolRewardMinted(
            uint256 indexed patrolId,
            address indexed player,
            address item,
            uint256 amount
        );
        event PatrolEquipmentMinted(
            uint256 indexed patrolId,
            address indexed player,
            address equipment,
            uint256 tokenId
        );
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    contract QuestCore {
        event QuestCompleted(
            uint256 indexed questId,
            address indexed player,
            uint256 heroId,
            uint8 questType
        );
        event ExpeditionIterationProcessed(
            uint256 indexed expeditionId,
            address indexed player,
            uint8 questType,
            uint256 iterationsProcessed
        );

        function getQuestType(uint256 questId) external view returns (uint8);
    }
}

sol! {
    /// Reward minter attached to the quest system.
    #[sol(rpc)]
    #[derive(Debug)]
    contract QuestRewardMinter {
        event RewardMinted(
            uint256 indexed questId,
            address indexed player,
            address reward,
            uint256 amount
        );
    }
}

sol! {
    #[derive(Debug)]
    struct HeroStats {
        uint16 strength;
        uint16 agility;
        uint16 intelligence;
        uint16 wisdom;
        uint16 luck;
        uint16 vitality;
        uint16 endurance;
        uint16 dexterity;
        uint16 hp;
        uint16 mp;
        uint16 stamina;
    }

    #[sol(rpc)]
    #[derive(Debug)]
    contract HeroCore {
        function getHeroV3(uint256 heroId)
            external
            view
            returns (
                uint256 id,
                uint8 mainClass,
                uint8 subClass,
                uint8 generation,
                uint8 rarity,
                HeroStats stats
            );
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    contract PetCore {
        function getPetV2(uint256 petId)
            external
            view
            returns (
                uint256 id,
                uint8 rarity,
                uint16 combatBonus,
                uint16 combatBonusScalar
            );
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    contract Profiles {
        function addressToProfile(address wallet)
            external
            view
            returns (address owner, string name, uint256 created);
    }
}
