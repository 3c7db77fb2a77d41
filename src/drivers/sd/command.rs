//! SD command set and response decoding
//!
//! Only the commands the driver issues are described. Application specific
//! commands (ACMDs) must be preceded by [`Command::AppCmd`].

use bitflags::bitflags;

use super::state::Encode;

/// Response class expected for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// No response
    None,
    /// 48-bit response (R1, R1b, R3, R6)
    Short,
    /// 136-bit response (R2: CID or CSD)
    Long,
}

impl ResponseKind {
    /// Number of response words worth capturing
    pub fn words(self) -> usize {
        match self {
            ResponseKind::None => 0,
            ResponseKind::Short => 2,
            ResponseKind::Long => 4,
        }
    }
}

/// SD commands issued by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// CMD0: GO_IDLE_STATE
    GoIdle = 0,
    /// CMD2: ALL_SEND_CID
    AllSendCid,
    /// CMD3: SEND_RELATIVE_ADDR
    SendRelativeAddr,
    /// CMD7: SELECT/DESELECT_CARD
    SelectCard,
    /// CMD9: SEND_CSD
    SendCsd,
    /// CMD12: STOP_TRANSMISSION
    StopTransmission,
    /// CMD13: SEND_STATUS
    SendStatus,
    /// CMD16: SET_BLOCKLEN
    SetBlockLen,
    /// CMD17: READ_SINGLE_BLOCK
    ReadSingle,
    /// CMD18: READ_MULTIPLE_BLOCK
    ReadMultiple,
    /// CMD24: WRITE_BLOCK
    WriteSingle,
    /// CMD25: WRITE_MULTIPLE_BLOCK
    WriteMultiple,
    /// CMD55: APP_CMD
    AppCmd,
    /// ACMD6: SET_BUS_WIDTH
    SetBusWidth,
    /// ACMD41: SD_SEND_OP_COND
    SendOpCond,
}

impl Command {
    const ALL: [Command; 15] = [
        Command::GoIdle,
        Command::AllSendCid,
        Command::SendRelativeAddr,
        Command::SelectCard,
        Command::SendCsd,
        Command::StopTransmission,
        Command::SendStatus,
        Command::SetBlockLen,
        Command::ReadSingle,
        Command::ReadMultiple,
        Command::WriteSingle,
        Command::WriteMultiple,
        Command::AppCmd,
        Command::SetBusWidth,
        Command::SendOpCond,
    ];

    /// Command index sent on the bus
    pub fn index(self) -> u8 {
        match self {
            Command::GoIdle => 0,
            Command::AllSendCid => 2,
            Command::SendRelativeAddr => 3,
            Command::SelectCard => 7,
            Command::SendCsd => 9,
            Command::StopTransmission => 12,
            Command::SendStatus => 13,
            Command::SetBlockLen => 16,
            Command::ReadSingle => 17,
            Command::ReadMultiple => 18,
            Command::WriteSingle => 24,
            Command::WriteMultiple => 25,
            Command::AppCmd => 55,
            Command::SetBusWidth => 6,
            Command::SendOpCond => 41,
        }
    }

    pub fn response_kind(self) -> ResponseKind {
        match self {
            Command::GoIdle => ResponseKind::None,
            Command::AllSendCid | Command::SendCsd => ResponseKind::Long,
            _ => ResponseKind::Short,
        }
    }

    /// Whether the command starts a card-bound data transfer
    pub fn is_write(self) -> bool {
        matches!(self, Command::WriteSingle | Command::WriteMultiple)
    }

    /// Whether the command starts a card-to-host data transfer
    pub fn is_read(self) -> bool {
        self == Command::ReadSingle
    }
}

impl Encode for Command {
    fn encode(self) -> u8 {
        self as u8
    }

    fn decode(raw: u8) -> Self {
        Command::ALL
            .get(raw as usize)
            .copied()
            .unwrap_or(Command::GoIdle)
    }
}

// ============================================================================
// Card Status (R1)
// ============================================================================

bitflags! {
    /// Card status bits of an R1 response
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const OUT_OF_RANGE = 1 << 31;
        const ADDRESS_ERROR = 1 << 30;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ERASE_SEQ_ERROR = 1 << 28;
        const ERASE_PARAM = 1 << 27;
        const WP_VIOLATION = 1 << 26;
        const CARD_IS_LOCKED = 1 << 25;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const COM_CRC_ERROR = 1 << 23;
        const ILLEGAL_COMMAND = 1 << 22;
        const CARD_ECC_FAILED = 1 << 21;
        const CC_ERROR = 1 << 20;
        const ERROR = 1 << 19;
        const CSD_OVERWRITE = 1 << 16;
        const WP_ERASE_SKIP = 1 << 15;
        const CARD_ECC_DISABLED = 1 << 14;
        const ERASE_RESET = 1 << 13;
        /// Card state (bits 12:9, see [`CardState`])
        const CURRENT_STATE = 0xF << 9;
        const READY_FOR_DATA = 1 << 8;
        const APP_CMD = 1 << 5;
        const AKE_SEQ_ERROR = 1 << 3;
    }
}

/// Card state reported in bits 12:9 of the card status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Identification,
    Standby,
    Transfer,
    SendingData,
    ReceivingData,
    Programming,
    Disconnect,
    Reserved(u8),
}

impl CardState {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::SendingData,
            6 => CardState::ReceivingData,
            7 => CardState::Programming,
            8 => CardState::Disconnect,
            other => CardState::Reserved(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            CardState::Idle => 0,
            CardState::Ready => 1,
            CardState::Identification => 2,
            CardState::Standby => 3,
            CardState::Transfer => 4,
            CardState::SendingData => 5,
            CardState::ReceivingData => 6,
            CardState::Programming => 7,
            CardState::Disconnect => 8,
            CardState::Reserved(bits) => bits,
        }
    }
}

impl CardStatus {
    pub fn state(self) -> CardState {
        CardState::from_bits(((self.bits() >> 9) & 0xF) as u8)
    }

    /// Card is back in the transfer state and ready for the next data phase
    pub fn transfer_ready(self) -> bool {
        self.state() == CardState::Transfer && self.contains(CardStatus::READY_FOR_DATA)
    }

    /// Card is still waiting for write data
    pub fn still_receiving(self) -> bool {
        self.state() == CardState::ReceivingData && self.contains(CardStatus::READY_FOR_DATA)
    }
}

// ============================================================================
// Operating Conditions (R3)
// ============================================================================

bitflags! {
    /// Operating conditions register reported by ACMD41
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ocr: u32 {
        /// Card power up sequence finished
        const POWERED_UP = 1 << 31;
        /// Card capacity status (high capacity card)
        const CCS = 1 << 30;
        const VDD_35_36 = 1 << 23;
        const VDD_34_35 = 1 << 22;
        const VDD_33_34 = 1 << 21;
        const VDD_32_33 = 1 << 20;
        const VDD_31_32 = 1 << 19;
        const VDD_30_31 = 1 << 18;
        const VDD_29_30 = 1 << 17;
        const VDD_28_29 = 1 << 16;
        const VDD_27_28 = 1 << 15;
    }
}

impl Ocr {
    /// Voltage window requested from the card (3.0 V to 3.5 V)
    pub const HOST_WINDOW: Ocr = Ocr::VDD_30_31
        .union(Ocr::VDD_31_32)
        .union(Ocr::VDD_32_33)
        .union(Ocr::VDD_33_34)
        .union(Ocr::VDD_34_35);
}

/// Bus width argument of ACMD6 selecting the 4-bit bus
pub const BUS_WIDTH_4: u32 = 0b10;

/// Relative card address argument (RCA in the upper half-word)
pub fn rca_argument(rca: u16) -> u32 {
    (rca as u32) << 16
}

/// Extract the RCA from an R6 response
pub fn published_rca(response: u32) -> u16 {
    (response >> 16) as u16
}
